//! Adapter that resolves an access token to a caller identity.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

/// Context struct for an authenticated caller
#[derive(Clone, Copy, Debug)]
pub struct Caller {
	pub user_id: UserId,
	pub is_admin: bool,
}

#[async_trait]
pub trait IdentityAdapter: Debug + Send + Sync {
	/// Validates an access token and returns the caller context
	async fn resolve(&self, token: &str) -> PfResult<Caller>;
}

// vim: ts=4

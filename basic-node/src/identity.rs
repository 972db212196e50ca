//! Development identity adapter: tokens are `user:<id>` or `admin:<id>`.
//!
//! First use of an unknown id registers the user, which keeps local nodes
//! free of a separate signup step. Not for production deployments.

use async_trait::async_trait;
use std::sync::Arc;

use peerflow_core::prelude::*;
use peerflow_types::identity_adapter::{Caller, IdentityAdapter};
use peerflow_types::store_adapter::StoreAdapter;

#[derive(Debug)]
pub struct DevTokenIdentity {
	store: Arc<dyn StoreAdapter>,
}

impl DevTokenIdentity {
	pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
		Self { store }
	}
}

#[async_trait]
impl IdentityAdapter for DevTokenIdentity {
	async fn resolve(&self, token: &str) -> PfResult<Caller> {
		let (is_admin, id) = match token.split_once(':') {
			Some(("user", id)) => (false, id),
			Some(("admin", id)) => (true, id),
			_ => return Err(Error::PermissionDenied),
		};
		let user_id = UserId(id.parse().map_err(|_| Error::PermissionDenied)?);

		match self.store.read_user(user_id).await {
			Ok(user) => {
				if !user.active {
					return Err(Error::PermissionDenied);
				}
				Ok(Caller { user_id, is_admin: is_admin || user.is_admin })
			}
			Err(Error::NotFound) => {
				info!("Registering {} {}", if is_admin { "admin" } else { "user" }, user_id);
				let user = self.store.create_user(user_id, is_admin).await?;
				Ok(Caller { user_id: user.user_id, is_admin })
			}
			Err(err) => Err(err),
		}
	}
}

// vim: ts=4

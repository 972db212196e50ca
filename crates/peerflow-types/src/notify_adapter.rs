//! Fire-and-forget notification sink.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifyKind {
	SessionSettled,
	PayoutCompleted,
	PayoutFailed,
}

impl NotifyKind {
	pub fn as_str(self) -> &'static str {
		match self {
			NotifyKind::SessionSettled => "session_settled",
			NotifyKind::PayoutCompleted => "payout_completed",
			NotifyKind::PayoutFailed => "payout_failed",
		}
	}
}

/// Outbound notification delivery (push, Telegram, ...).
///
/// Settlement and payout code emit these AFTER their ledger transaction
/// commits and never block on or fail because of delivery; implementations
/// swallow and log their own errors.
#[async_trait]
pub trait NotifyAdapter: Debug + Send + Sync {
	async fn notify(&self, user_id: UserId, kind: NotifyKind, payload: serde_json::Value);
}

// vim: ts=4

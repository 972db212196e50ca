//! Notification sink that just logs. A deployment wanting push or Telegram
//! delivery drops in its own `NotifyAdapter` here.

use async_trait::async_trait;

use peerflow_core::prelude::*;
use peerflow_types::notify_adapter::{NotifyAdapter, NotifyKind};

#[derive(Debug)]
pub struct LogNotify;

#[async_trait]
impl NotifyAdapter for LogNotify {
	async fn notify(&self, user_id: UserId, kind: NotifyKind, payload: serde_json::Value) {
		info!("notify user {}: {} {}", user_id, kind.as_str(), payload);
	}
}

// vim: ts=4

//! Adapter for the asynchronous payout provider.
//!
//! The provider contract is abstract: submit a payout, get a provider-side
//! payout id back, then learn the outcome either from a callback relayed by
//! the caller or by polling [`PayoutAdapter::check_status`]. Webhook
//! signature schemes are the transport layer's concern, not this trait's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::prelude::*;

/// Typed provider state envelope (no open-ended status maps).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutState {
	Sending,
	Confirming,
	Confirmed,
	Failed,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutStatus {
	pub state: PayoutState,
	pub tx_hash: Option<Box<str>>,
	/// Provider-side failure reason, logged but never surfaced to end users
	pub reason: Option<Box<str>>,
}

#[derive(Debug)]
pub struct SubmitPayout<'a> {
	pub amount: Usd,
	pub wallet_address: &'a str,
	pub network: &'a str,
	/// Forwarded to the provider so a retried submit cannot double-pay
	pub idempotency_key: &'a str,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutReceipt {
	pub payout_id: Box<str>,
	pub status: PayoutStatus,
}

#[async_trait]
pub trait PayoutAdapter: Debug + Send + Sync {
	/// Submits a payout. Deadline handling is the caller's: a timeout maps
	/// to `UpstreamUnavailable` and leaves the withdrawal in `processing`
	/// for the poll sweep.
	async fn submit(&self, payout: &SubmitPayout<'_>) -> PfResult<PayoutReceipt>;

	async fn check_status(&self, payout_id: &str) -> PfResult<PayoutStatus>;
}

// vim: ts=4

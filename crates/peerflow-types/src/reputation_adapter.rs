//! Adapter that resolves the reputation of a client IP address.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::prelude::*;

/// Reputation snapshot for one IP address.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpReputation {
	/// ISO 3166-1 alpha-2 country code, "XX" when unknown
	pub country: Box<str>,
	pub asn: Option<Box<str>>,
	pub isp: Option<Box<str>>,
	pub is_proxy: bool,
	pub is_datacenter: bool,
	/// VPN likelihood, 0..=100
	pub vpn_score: u8,
}

/// Replaceable IP reputation lookup.
///
/// Lookups may be slow (remote API) and may fail; the admission filter
/// fails open on `UpstreamUnavailable`, so implementations should map
/// network/timeout errors to that variant rather than guessing a result.
/// Results are cacheable with a bounded TTL — reputation changes.
#[async_trait]
pub trait IpReputationAdapter: Debug + Send + Sync {
	async fn lookup(&self, ip: &str) -> PfResult<IpReputation>;
}

// vim: ts=4

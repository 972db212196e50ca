//! Admission filter: decides whether a device may start a traffic session.
//!
//! Signals: IP reputation (region, proxy flag, datacenter flag, VPN
//! likelihood score) and the client-reported network type. Reputation
//! lookups fail open — an unreachable reputation service never blocks
//! admission, it only leaves a `reputation_check_failed` marker in the
//! audit trail. Every evaluation is persisted as a write-once audit row
//! before the caller acts on it.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use peerflow_types::prelude::*;
use peerflow_types::reputation_adapter::{IpReputation, IpReputationAdapter};
use peerflow_types::store_adapter::{CreateFilterAudit, FilterStatus, StoreAdapter};

use crate::settings::AdmissionSettings;

/// One admission signal. Only some of them deny.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FilterReason {
	AdminBypass,
	IpMissing,
	RegionNotAllowed(Box<str>),
	ProxyDetected,
	VpnScoreExceeded(u8),
	NetworkTypeBlocked(Box<str>),
	DatacenterIp,
	CheckFailed,
}

impl FilterReason {
	pub fn denies(&self) -> bool {
		match self {
			FilterReason::AdminBypass
			| FilterReason::IpMissing
			| FilterReason::CheckFailed => false,
			FilterReason::RegionNotAllowed(_)
			| FilterReason::ProxyDetected
			| FilterReason::VpnScoreExceeded(_)
			| FilterReason::NetworkTypeBlocked(_)
			| FilterReason::DatacenterIp => true,
		}
	}

	/// Stable code persisted in audit rows and session metadata.
	pub fn code(&self) -> Box<str> {
		match self {
			FilterReason::AdminBypass => "admin_bypass".into(),
			FilterReason::IpMissing => "ip_missing".into(),
			FilterReason::RegionNotAllowed(cc) => format!("region_not_allowed:{cc}").into(),
			FilterReason::ProxyDetected => "proxy_detected".into(),
			FilterReason::VpnScoreExceeded(score) => format!("vpn_score:{score}").into(),
			FilterReason::NetworkTypeBlocked(ty) => format!("network_type_blocked:{ty}").into(),
			FilterReason::DatacenterIp => "datacenter_ip".into(),
			FilterReason::CheckFailed => "reputation_check_failed".into(),
		}
	}
}

/// Outcome of one evaluation.
#[derive(Clone, Debug)]
pub struct Decision {
	pub allowed: bool,
	pub status: FilterStatus,
	pub reasons: Vec<FilterReason>,
	pub reputation: Option<IpReputation>,
}

impl Decision {
	pub fn reason_codes(&self) -> Vec<Box<str>> {
		self.reasons.iter().map(FilterReason::code).collect()
	}
}

/// Request context the filter evaluates. `session_id` links the audit row
/// to the session the caller is about to create.
#[derive(Debug, Default)]
pub struct AdmissionRequest<'a> {
	pub session_id: Option<&'a str>,
	pub client_ip: Option<&'a str>,
	pub network_type: Option<&'a str>,
	pub device_id: Option<&'a str>,
	pub is_admin: bool,
}

/// All reputation-derived checks, pure so they are testable in isolation.
/// Reasons accumulate; nothing short-circuits.
fn evaluate_reputation(settings: &AdmissionSettings, rep: &IpReputation) -> Vec<FilterReason> {
	let mut reasons = Vec::new();

	if !settings.allowed_regions.iter().any(|r| **r == *rep.country) {
		reasons.push(FilterReason::RegionNotAllowed(rep.country.clone()));
	}
	if rep.is_proxy {
		reasons.push(FilterReason::ProxyDetected);
	}
	if rep.vpn_score >= settings.vpn_block_threshold {
		reasons.push(FilterReason::VpnScoreExceeded(rep.vpn_score));
	} else if rep.vpn_score >= settings.vpn_warn_threshold {
		warn!("elevated vpn score {} below block threshold", rep.vpn_score);
	}
	if rep.is_datacenter {
		let isp = rep.isp.as_deref().unwrap_or("").to_lowercase();
		let whitelisted = settings.datacenter_isp_whitelist.iter().any(|w| isp.contains(&**w));
		if !whitelisted {
			reasons.push(FilterReason::DatacenterIp);
		}
	}
	reasons
}

/// TTL-bounded LRU in front of the reputation adapter.
#[derive(Debug)]
struct ReputationCache {
	adapter: Arc<dyn IpReputationAdapter>,
	cache: Mutex<LruCache<Box<str>, (Timestamp, IpReputation)>>,
	ttl_secs: i64,
}

impl ReputationCache {
	fn new(adapter: Arc<dyn IpReputationAdapter>, capacity: usize, ttl_secs: u64) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
		ReputationCache {
			adapter,
			cache: Mutex::new(LruCache::new(capacity)),
			ttl_secs: ttl_secs as i64,
		}
	}

	async fn lookup(&self, ip: &str) -> PfResult<IpReputation> {
		let at = now();
		if let Some((cached_at, rep)) = self.cache.lock().get(ip) {
			if at.0 - cached_at.0 < self.ttl_secs {
				return Ok(rep.clone());
			}
		}
		let rep = self.adapter.lookup(ip).await?;
		self.cache.lock().put(ip.into(), (at, rep.clone()));
		Ok(rep)
	}
}

#[derive(Debug)]
pub struct AdmissionFilter {
	settings: AdmissionSettings,
	store: Arc<dyn StoreAdapter>,
	reputation: ReputationCache,
}

impl AdmissionFilter {
	pub fn new(
		settings: AdmissionSettings,
		store: Arc<dyn StoreAdapter>,
		reputation: Arc<dyn IpReputationAdapter>,
	) -> Self {
		let cache = ReputationCache::new(
			reputation,
			settings.reputation_cache_capacity,
			settings.reputation_cache_ttl_secs,
		);
		AdmissionFilter { settings, store, reputation: cache }
	}

	/// Evaluates one admission request and records the audit row. The audit
	/// write is part of the evaluation: if it fails, the whole evaluation
	/// fails and no session may be started.
	pub async fn evaluate(&self, user_id: UserId, req: &AdmissionRequest<'_>)
	-> PfResult<Decision> {
		let decision = if req.is_admin {
			Decision {
				allowed: true,
				status: FilterStatus::Skipped,
				reasons: vec![FilterReason::AdminBypass],
				reputation: None,
			}
		} else {
			self.run_checks(req).await
		};

		self.write_audit(user_id, req, &decision).await?;
		if !decision.allowed {
			info!(
				"admission denied for user {}: {:?}",
				user_id,
				decision.reason_codes()
			);
		}
		Ok(decision)
	}

	async fn run_checks(&self, req: &AdmissionRequest<'_>) -> Decision {
		let mut reasons = Vec::new();
		let mut reputation = None;

		match req.client_ip {
			None => reasons.push(FilterReason::IpMissing),
			Some(ip) => match self.reputation.lookup(ip).await {
				Ok(rep) => {
					reasons.extend(evaluate_reputation(&self.settings, &rep));
					reputation = Some(rep);
				}
				Err(err) => {
					warn!("reputation lookup for {ip} failed, admitting: {err}");
					reasons.push(FilterReason::CheckFailed);
				}
			},
		}

		if let Some(ty) = req.network_type {
			let ty = ty.to_lowercase();
			if self.settings.blocked_network_types.iter().any(|b| **b == *ty) {
				reasons.push(FilterReason::NetworkTypeBlocked(ty.into()));
			}
		}

		let allowed = !reasons.iter().any(FilterReason::denies);
		let status = if allowed { FilterStatus::Passed } else { FilterStatus::Failed };
		Decision { allowed, status, reasons, reputation }
	}

	async fn write_audit(
		&self,
		user_id: UserId,
		req: &AdmissionRequest<'_>,
		decision: &Decision,
	) -> PfResult<()> {
		let codes = decision.reason_codes();
		let rep = decision.reputation.as_ref();
		self.store
			.append_filter_audit(&CreateFilterAudit {
				user_id,
				session_id: req.session_id,
				device_id: req.device_id,
				client_ip: req.client_ip,
				country: rep.map(|r| &*r.country),
				asn: rep.and_then(|r| r.asn.as_deref()),
				isp: rep.and_then(|r| r.isp.as_deref()),
				is_proxy: rep.is_some_and(|r| r.is_proxy),
				is_datacenter: rep.is_some_and(|r| r.is_datacenter),
				vpn_score: rep.map(|r| r.vpn_score),
				network_type: req.network_type,
				allowed: decision.allowed,
				reasons: &codes,
				created_at: now(),
			})
			.await?;
		Ok(())
	}
}


// vim: ts=4

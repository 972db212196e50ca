//! Engine configuration with defaults matching production operation.

use serde::{Deserialize, Serialize};

use peerflow_types::types::Usd;

/// EU-27 member states.
const EU_REGIONS: [&str; 27] = [
	"AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
	"LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
];

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdmissionSettings {
	/// ISO country codes admitted to share traffic
	pub allowed_regions: Vec<Box<str>>,
	/// VPN score at or above which admission is denied
	pub vpn_block_threshold: u8,
	/// VPN score at or above which the session is logged but admitted
	pub vpn_warn_threshold: u8,
	/// Client-reported network types that are denied outright
	pub blocked_network_types: Vec<Box<str>>,
	/// ISP substrings for which a datacenter flag is tolerated
	pub datacenter_isp_whitelist: Vec<Box<str>>,
	pub reputation_cache_ttl_secs: u64,
	pub reputation_cache_capacity: usize,
}

impl Default for AdmissionSettings {
	fn default() -> Self {
		let mut allowed_regions: Vec<Box<str>> = vec!["US".into()];
		allowed_regions.extend(EU_REGIONS.iter().map(|r| Box::from(*r)));
		AdmissionSettings {
			allowed_regions,
			vpn_block_threshold: 70,
			vpn_warn_threshold: 50,
			blocked_network_types: vec!["vpn".into(), "proxy".into(), "tor".into()],
			datacenter_isp_whitelist: vec![
				"amazon".into(),
				"aws".into(),
				"google".into(),
				"microsoft".into(),
				"azure".into(),
				"digitalocean".into(),
				"linode".into(),
				"vultr".into(),
				"hetzner".into(),
			],
			reputation_cache_ttl_secs: 6 * 3600,
			reputation_cache_capacity: 4096,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PricingSettings {
	/// Rate per gigabyte applied when no price row exists at all
	pub fallback_rate_per_gb: Usd,
}

impl Default for PricingSettings {
	fn default() -> Self {
		// $1.536/GB keeps the legacy $0.0015/MB rate exact
		PricingSettings { fallback_rate_per_gb: Usd::from_micros(1_536_000) }
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
	/// Active sessions silent for longer than this are reclaimed as failed
	pub orphan_timeout_secs: i64,
}

impl Default for SessionSettings {
	fn default() -> Self {
		SessionSettings { orphan_timeout_secs: 600 }
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcileSettings {
	/// Drift tolerance as a percentage of the authoritative counter
	pub tolerance_percent: f64,
	/// Absolute floor under the percentage tolerance, in megabytes
	pub tolerance_floor_mb: f64,
	/// How far back the periodic sweep re-checks completed sessions
	pub window_secs: i64,
}

impl Default for ReconcileSettings {
	fn default() -> Self {
		ReconcileSettings { tolerance_percent: 1.0, tolerance_floor_mb: 5.0, window_secs: 86_400 }
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WithdrawSettings {
	pub min_amount: Usd,
	pub max_amount: Usd,
	pub default_network: Box<str>,
	/// Budget for one synchronous provider submit before the poll sweep
	/// takes over
	pub provider_deadline_secs: u64,
}

impl Default for WithdrawSettings {
	fn default() -> Self {
		WithdrawSettings {
			min_amount: Usd::from_dollars(10),
			max_amount: Usd::from_dollars(500),
			default_network: "BEP20".into(),
			provider_deadline_secs: 60,
		}
	}
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
	pub admission: AdmissionSettings,
	pub pricing: PricingSettings,
	pub session: SessionSettings,
	pub reconcile: ReconcileSettings,
	pub withdraw: WithdrawSettings,
}


// vim: ts=4

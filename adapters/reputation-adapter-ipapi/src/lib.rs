//! IP reputation adapter backed by the ip-api.com JSON endpoint.
//!
//! The provider returns geolocation plus `proxy` and `hosting` booleans; the
//! VPN likelihood score is derived here from those flags and the ISP name.
//! Any transport failure or non-success provider status maps to
//! `UpstreamUnavailable` so the admission filter can fail open.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use peerflow::{
	prelude::*,
	reputation_adapter::{IpReputation, IpReputationAdapter},
};

const DEFAULT_BASE_URL: &str = "http://ip-api.com/json";
const LOOKUP_FIELDS: &str = "status,message,countryCode,as,isp,proxy,hosting";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// ISP name fragments that push the score up even when the provider does
/// not flag the address.
const SUSPECT_ISP_KEYWORDS: &[&str] = &["vpn", "proxy", "hosting", "cloud", "datacenter"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
	status: Box<str>,
	message: Option<Box<str>>,
	country_code: Option<Box<str>>,
	#[serde(rename = "as")]
	asn: Option<Box<str>>,
	isp: Option<Box<str>>,
	proxy: Option<bool>,
	hosting: Option<bool>,
}

/// Additive VPN likelihood: proxy flag carries the most weight, hosting
/// follows, a suspect ISP name tops it up. Capped at 100.
fn vpn_score(proxy: bool, hosting: bool, isp: Option<&str>) -> u8 {
	let mut score = 0u8;
	if proxy {
		score += 50;
	}
	if hosting {
		score += 40;
	}
	if let Some(isp) = isp {
		let isp = isp.to_lowercase();
		if SUSPECT_ISP_KEYWORDS.iter().any(|kw| isp.contains(kw)) {
			score += 20;
		}
	}
	score.min(100)
}

#[derive(Debug)]
pub struct IpApiReputationAdapter {
	client: reqwest::Client,
	base_url: Box<str>,
}

impl IpApiReputationAdapter {
	pub fn new(base_url: Option<&str>) -> PfResult<Self> {
		let client = reqwest::Client::builder()
			.timeout(LOOKUP_TIMEOUT)
			.build()
			.map_err(|err| Error::Internal(format!("reputation client init: {}", err)))?;
		Ok(Self {
			client,
			base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').into(),
		})
	}
}

#[async_trait]
impl IpReputationAdapter for IpApiReputationAdapter {
	async fn lookup(&self, ip: &str) -> PfResult<IpReputation> {
		let url = format!("{}/{}?fields={}", self.base_url, ip, LOOKUP_FIELDS);
		let res = self.client.get(&url).send().await.map_err(|err| {
			warn!("Reputation lookup failed for {}: {}", ip, err);
			Error::UpstreamUnavailable("ip reputation provider".into())
		})?;
		if !res.status().is_success() {
			warn!("Reputation lookup for {} returned HTTP {}", ip, res.status());
			return Err(Error::UpstreamUnavailable("ip reputation provider".into()));
		}
		let body: IpApiResponse = res.json().await.map_err(|err| {
			warn!("Reputation response for {} unreadable: {}", ip, err);
			Error::UpstreamUnavailable("ip reputation provider".into())
		})?;

		if &*body.status != "success" {
			// "fail" covers reserved ranges and quota exhaustion alike; the
			// caller cannot tell them apart, so neither do we
			warn!(
				"Reputation lookup for {} failed: {}",
				ip,
				body.message.as_deref().unwrap_or("no message")
			);
			return Err(Error::UpstreamUnavailable("ip reputation provider".into()));
		}

		let proxy = body.proxy.unwrap_or(false);
		let hosting = body.hosting.unwrap_or(false);
		Ok(IpReputation {
			country: body.country_code.unwrap_or_else(|| "XX".into()),
			asn: body.asn,
			isp: body.isp.clone(),
			is_proxy: proxy,
			is_datacenter: hosting,
			vpn_score: vpn_score(proxy, hosting, body.isp.as_deref()),
		})
	}
}


// vim: ts=4

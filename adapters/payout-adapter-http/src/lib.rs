//! HTTP payout adapter for a JSON crypto payout provider.
//!
//! The provider contract: `POST /payouts` submits a transfer (idempotent on
//! the forwarded key), `GET /payouts/{id}` polls its state. Provider status
//! strings collapse into the typed [`PayoutState`] envelope here; nothing
//! else in the engine ever sees a raw provider status.
//!
//! Without an API key the adapter runs in mock mode and confirms every
//! payout immediately, which is what local development nodes want.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use peerflow::{
	prelude::*,
	payout_adapter::{PayoutAdapter, PayoutReceipt, PayoutState, PayoutStatus, SubmitPayout},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderSubmit<'a> {
	amount: &'a str,
	address: &'a str,
	network: &'a str,
	external_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderPayout {
	id: Box<str>,
	status: Box<str>,
	hash: Option<Box<str>>,
	reason: Option<Box<str>>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
	message: Option<Box<str>>,
}

fn parse_state(status: &str) -> PfResult<PayoutState> {
	match status {
		"created" | "pending" | "sending" => Ok(PayoutState::Sending),
		"broadcast" | "confirming" => Ok(PayoutState::Confirming),
		"confirmed" | "success" => Ok(PayoutState::Confirmed),
		"failed" | "rejected" | "expired" => Ok(PayoutState::Failed),
		other => {
			error!("Unknown payout provider status: {}", other);
			Err(Error::Parse)
		}
	}
}

fn parse_status(payout: &ProviderPayout) -> PfResult<PayoutStatus> {
	Ok(PayoutStatus {
		state: parse_state(&payout.status)?,
		tx_hash: payout.hash.clone(),
		reason: payout.reason.clone(),
	})
}

/// Formats micro-dollar amounts the way the provider expects (decimal
/// string, six fractional digits).
fn format_amount(amount: Usd) -> String {
	let micros = amount.micros();
	format!("{}.{:06}", micros / Usd::MICROS, micros.unsigned_abs() % Usd::MICROS as u64)
}

fn transport_err(err: &reqwest::Error) -> Error {
	warn!("Payout provider request failed: {}", err);
	Error::UpstreamUnavailable("payout provider".into())
}

#[derive(Debug)]
pub struct HttpPayoutAdapter {
	client: reqwest::Client,
	base_url: Box<str>,
	api_key: Option<Box<str>>,
}

impl HttpPayoutAdapter {
	pub fn new(base_url: &str, api_key: Option<&str>) -> PfResult<Self> {
		let client = reqwest::Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(|err| Error::Internal(format!("payout client init: {}", err)))?;
		if api_key.is_none() {
			warn!("Payout adapter running in mock mode, transfers are simulated");
		}
		Ok(Self {
			client,
			base_url: base_url.trim_end_matches('/').into(),
			api_key: api_key.map(Into::into),
		})
	}

	async fn parse_payout(&self, res: reqwest::Response) -> PfResult<ProviderPayout> {
		let status = res.status();
		if status.is_success() {
			return res.json().await.map_err(|err| {
				warn!("Payout provider response unreadable: {}", err);
				Error::UpstreamUnavailable("payout provider".into())
			});
		}
		if status.is_server_error() {
			warn!("Payout provider returned HTTP {}", status);
			return Err(Error::UpstreamUnavailable("payout provider".into()));
		}
		if status == reqwest::StatusCode::NOT_FOUND {
			return Err(Error::NotFound);
		}
		// remaining 4xx: the provider rejected the request itself
		let message = res
			.json::<ProviderError>()
			.await
			.ok()
			.and_then(|e| e.message)
			.unwrap_or_else(|| "payout rejected".into());
		Err(Error::Validation(message.into()))
	}
}

#[async_trait]
impl PayoutAdapter for HttpPayoutAdapter {
	async fn submit(&self, payout: &SubmitPayout<'_>) -> PfResult<PayoutReceipt> {
		let Some(api_key) = &self.api_key else {
			info!(
				"MOCK payout: {} to {} on {}",
				payout.amount, payout.wallet_address, payout.network
			);
			return Ok(PayoutReceipt {
				payout_id: format!("MOCK_{}", payout.idempotency_key).into(),
				status: PayoutStatus {
					state: PayoutState::Confirmed,
					tx_hash: Some("0x0000000000000000".into()),
					reason: None,
				},
			});
		};

		let amount = format_amount(payout.amount);
		let body = ProviderSubmit {
			amount: &amount,
			address: payout.wallet_address,
			network: payout.network,
			external_id: payout.idempotency_key,
		};
		let res = self
			.client
			.post(format!("{}/payouts", self.base_url))
			.bearer_auth(&**api_key)
			.json(&body)
			.send()
			.await
			.map_err(|err| transport_err(&err))?;
		let payout = self.parse_payout(res).await?;
		let status = parse_status(&payout)?;
		Ok(PayoutReceipt { payout_id: payout.id, status })
	}

	async fn check_status(&self, payout_id: &str) -> PfResult<PayoutStatus> {
		let Some(api_key) = &self.api_key else {
			return Ok(PayoutStatus {
				state: PayoutState::Confirmed,
				tx_hash: Some("0x0000000000000000".into()),
				reason: None,
			});
		};

		let res = self
			.client
			.get(format!("{}/payouts/{}", self.base_url, payout_id))
			.bearer_auth(&**api_key)
			.send()
			.await
			.map_err(|err| transport_err(&err))?;
		let payout = self.parse_payout(res).await?;
		parse_status(&payout)
	}
}


// vim: ts=4

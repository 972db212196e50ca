//! Reconciliation: detects and repairs drift between the three places a
//! session's worth is recorded.
//!
//! Three comparisons, in order of authority:
//! - raw report deltas vs the session's `server_mb` counter (the counter
//!   is a running sum of the deltas, so they must agree within tolerance)
//! - `server_mb` priced at the accrual-date rate vs the stored `earned`
//! - the user's balance field vs the sum of their ledger deltas
//!
//! Repairs always flow downhill from the rawer record: report deltas fix
//! the counter, the counter fixes earnings, the ledger fixes the balance.
//! A repair of already settled earnings applies a signed compensating
//! ledger entry rather than editing history.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use peerflow_types::prelude::*;
use peerflow_types::store_adapter::{LedgerReason, Session, StoreAdapter};

use crate::keyed_lock::KeyedLock;
use crate::ledger::{BalanceAudit, BalanceLedger};
use crate::pricing::PricingOracle;
use crate::settings::ReconcileSettings;

/// Earnings smaller than this are not worth a compensating entry.
const EARNINGS_EPSILON: Usd = Usd::from_cents(1);

/// Outcome of one session counter check.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAudit {
	pub session_id: Box<str>,
	pub server_mb: f64,
	pub report_sum_mb: f64,
	pub drift_mb: f64,
	pub tolerance_mb: f64,
	pub corrected: bool,
}

/// Outcome of one earnings check.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsAudit {
	pub session_id: Box<str>,
	pub earned: Usd,
	pub expected: Usd,
	pub corrected: bool,
}

#[derive(Debug)]
pub struct ReconciliationEngine {
	store: Arc<dyn StoreAdapter>,
	pricing: Arc<PricingOracle>,
	ledger: Arc<BalanceLedger>,
	settings: ReconcileSettings,
	session_locks: Arc<KeyedLock<Box<str>>>,
}

impl ReconciliationEngine {
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		pricing: Arc<PricingOracle>,
		ledger: Arc<BalanceLedger>,
		settings: ReconcileSettings,
		session_locks: Arc<KeyedLock<Box<str>>>,
	) -> Self {
		ReconciliationEngine { store, pricing, ledger, settings, session_locks }
	}

	fn tolerance_for(&self, server_mb: f64) -> f64 {
		(server_mb * self.settings.tolerance_percent / 100.0).max(self.settings.tolerance_floor_mb)
	}

	/// Re-derives `server_mb` from the raw report deltas. Within tolerance
	/// the session is left alone; beyond it the counter (and earnings) are
	/// rewritten from the reports.
	pub async fn reconcile_session(&self, session_id: &str) -> PfResult<SessionAudit> {
		let _guard = self.session_locks.lock(session_id.into()).await;
		let session = self.store.read_session(session_id).await?;
		let report_sum_mb = self.store.sum_report_deltas(session.s_id).await?;
		let drift_mb = (report_sum_mb - session.server_mb).abs();
		let tolerance_mb = self.tolerance_for(session.server_mb);

		let mut audit = SessionAudit {
			session_id: session.session_id.clone(),
			server_mb: session.server_mb,
			report_sum_mb,
			drift_mb,
			tolerance_mb,
			corrected: false,
		};
		if drift_mb <= tolerance_mb {
			return Ok(audit);
		}

		warn!(
			"session {} counter drift: {:.3} MB recorded vs {:.3} MB reported",
			session_id, session.server_mb, report_sum_mb
		);
		let rate = self.pricing.rate_for(&session.accrual_date).await?;
		let corrected_earned = Usd::price_mb(report_sum_mb, rate);
		self.correct_earnings(&session, corrected_earned, report_sum_mb).await?;
		audit.corrected = true;
		Ok(audit)
	}

	/// Re-prices `server_mb` at the accrual-date rate and repairs `earned`
	/// when the stored value is off by at least a cent.
	pub async fn verify_earnings(&self, session_id: &str) -> PfResult<EarningsAudit> {
		let _guard = self.session_locks.lock(session_id.into()).await;
		let session = self.store.read_session(session_id).await?;
		let rate = self.pricing.rate_for(&session.accrual_date).await?;
		let expected = Usd::price_mb(session.server_mb, rate);

		let mut audit = EarningsAudit {
			session_id: session.session_id.clone(),
			earned: session.earned,
			expected,
			corrected: false,
		};
		if (expected - session.earned).abs() < EARNINGS_EPSILON {
			return Ok(audit);
		}

		warn!(
			"session {} earnings drift: {} stored vs {} expected",
			session_id, session.earned, expected
		);
		self.correct_earnings(&session, expected, session.server_mb).await?;
		audit.corrected = true;
		Ok(audit)
	}

	/// Rewrites the counter/earnings pair, compensating the ledger first
	/// when the session was already settled. The ledger entry goes in before
	/// the counter rewrite so a retry after a partial failure recomputes the
	/// same delta and replays idempotently instead of losing the adjustment.
	async fn correct_earnings(
		&self,
		session: &Session,
		corrected_earned: Usd,
		corrected_mb: f64,
	) -> PfResult<()> {
		if session.settled && corrected_earned != session.earned {
			let delta = corrected_earned - session.earned;
			let reference = format!(
				"corr:{}:{}:{}",
				session.session_id,
				session.earned.micros(),
				corrected_earned.micros()
			);
			self.ledger
				.adjust(session.user_id, delta, LedgerReason::EarningsCorrection, &reference)
				.await?;
		}
		self.store
			.rewrite_session_counter(&session.session_id, corrected_mb, corrected_earned)
			.await?;
		info!(
			"session {} corrected to {:.3} MB / {}",
			session.session_id, corrected_mb, corrected_earned
		);
		Ok(())
	}

	/// Balance-vs-ledger check for one user.
	pub async fn reconcile_user_balance(&self, user_id: UserId) -> PfResult<BalanceAudit> {
		self.ledger.reconcile_user(user_id).await
	}

	/// Periodic sweep: re-checks counters and earnings of sessions completed
	/// inside the configured window. Returns the number of corrections.
	pub async fn reconcile_recent(&self) -> PfResult<u32> {
		let since = Timestamp(now().0 - self.settings.window_secs);
		let sessions = self.store.list_completed_sessions_since(since).await?;
		let mut corrected = 0;
		for session in sessions {
			match self.reconcile_session(&session.session_id).await {
				Ok(audit) if audit.corrected => corrected += 1,
				Ok(_) => match self.verify_earnings(&session.session_id).await {
					Ok(audit) if audit.corrected => corrected += 1,
					Ok(_) => {}
					Err(err) => {
						error!("earnings check of {} failed: {err}", session.session_id);
					}
				},
				Err(err) => error!("reconcile of {} failed: {err}", session.session_id),
			}
		}
		Ok(corrected)
	}

	/// Periodic sweep over all users' balances. Returns the number of
	/// corrections.
	pub async fn reconcile_all_balances(&self) -> PfResult<u32> {
		let mut corrected = 0;
		for user_id in self.store.list_user_ids().await? {
			match self.ledger.reconcile_user(user_id).await {
				Ok(audit) if audit.corrected => corrected += 1,
				Ok(_) => {}
				Err(err) => error!("balance reconcile of user {user_id} failed: {err}"),
			}
		}
		Ok(corrected)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tolerance_floor_applies_to_small_sessions() {
		let settings = ReconcileSettings::default();
		// 1% of 30 MB is 0.3 MB; the 5 MB floor wins
		let tol = (30.0f64 * settings.tolerance_percent / 100.0).max(settings.tolerance_floor_mb);
		assert_eq!(tol, 5.0);
		// 1% of 10 GB wins over the floor
		let tol =
			(10_240.0f64 * settings.tolerance_percent / 100.0).max(settings.tolerance_floor_mb);
		assert!((tol - 102.4).abs() < 1e-9);
	}
}

// vim: ts=4

//! Session lifecycle: start, traffic reports, heartbeat, stop, orphan
//! reclaim, settlement.
//!
//! The server-side counter `server_mb` (sum of accepted report deltas) is
//! the only input to earnings; the client's cumulative claim is stored for
//! drift diagnostics and never priced. All mutations of one session are
//! serialized through a per-session lock, so the status checks below are
//! race-free against concurrent stop/report/reclaim.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use peerflow_types::notify_adapter::{NotifyAdapter, NotifyKind};
use peerflow_types::prelude::*;
use peerflow_types::store_adapter::{
	CreateReport, CreateSession, LedgerReason, Session, SessionStatus, StoreAdapter,
};

use crate::admission::{AdmissionFilter, AdmissionRequest, Decision};
use crate::keyed_lock::KeyedLock;
use crate::ledger::BalanceLedger;
use crate::pricing::{self, PricingOracle};
use crate::settings::{ReconcileSettings, SessionSettings};

#[derive(Debug, Default)]
pub struct StartSession<'a> {
	pub device_id: Option<&'a str>,
	pub client_ip: Option<&'a str>,
	pub network_type: Option<&'a str>,
	pub app_version: Option<&'a str>,
	pub os: Option<&'a str>,
	pub battery_level: Option<i32>,
}

/// Result of a start attempt. On deny the session row is a terminal
/// analytics record, never an active session.
#[derive(Debug)]
pub struct Started {
	pub session: Session,
	pub decision: Decision,
}

#[derive(Debug, Default)]
pub struct TrafficReport<'a> {
	/// Megabytes shared since the previous report
	pub delta_mb: f64,
	/// Client's own lifetime counter for the session, advisory
	pub cumulative_mb: f64,
	pub speed_mbps: Option<f64>,
	pub network_type: Option<&'a str>,
	pub battery_level: Option<i32>,
}

/// Per-user aggregates over recent sessions.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
	pub today_sessions: u32,
	pub today_mb: f64,
	pub today_earned: Usd,
	pub week_sessions: u32,
	pub week_mb: f64,
	pub week_earned: Usd,
}

#[derive(Debug)]
pub struct SessionEngine {
	store: Arc<dyn StoreAdapter>,
	filter: Arc<AdmissionFilter>,
	pricing: Arc<PricingOracle>,
	ledger: Arc<BalanceLedger>,
	notify: Arc<dyn NotifyAdapter>,
	settings: SessionSettings,
	reconcile: ReconcileSettings,
	locks: Arc<KeyedLock<Box<str>>>,
}

impl SessionEngine {
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		filter: Arc<AdmissionFilter>,
		pricing: Arc<PricingOracle>,
		ledger: Arc<BalanceLedger>,
		notify: Arc<dyn NotifyAdapter>,
		settings: SessionSettings,
		reconcile: ReconcileSettings,
		locks: Arc<KeyedLock<Box<str>>>,
	) -> Self {
		SessionEngine { store, filter, pricing, ledger, notify, settings, reconcile, locks }
	}

	/// Starts a session: one-active-per-user check, admission filter, then
	/// the session row. A denied start still persists a terminal row so the
	/// attempt shows up in analytics.
	pub async fn start(
		&self,
		user_id: UserId,
		data: &StartSession<'_>,
		is_admin: bool,
	) -> PfResult<Started> {
		let active = self.store.list_active_sessions(Some(user_id)).await?;
		if !active.is_empty() {
			return Err(Error::StateConflict("session_already_active"));
		}

		let session_id = format!("sess_{}", Uuid::new_v4().simple());
		let decision = self
			.filter
			.evaluate(
				user_id,
				&AdmissionRequest {
					session_id: Some(&session_id),
					client_ip: data.client_ip,
					network_type: data.network_type,
					device_id: data.device_id,
					is_admin,
				},
			)
			.await?;

		let start_time = now();
		let reasons = decision.reason_codes();
		let status =
			if decision.allowed { SessionStatus::Active } else { SessionStatus::Failed };
		// the unique-active index backstops the pre-check above under races
		let session = self
			.store
			.create_session(&CreateSession {
				session_id: &session_id,
				user_id,
				status,
				filter_status: decision.status,
				filter_reasons: &reasons,
				accrual_date: &pricing::date_of(start_time),
				start_time,
				device_id: data.device_id,
				client_ip: data.client_ip,
				network_type: data.network_type,
				app_version: data.app_version,
				os: data.os,
				battery_level: data.battery_level,
			})
			.await?;

		if decision.allowed {
			info!("session {} started for user {}", session.session_id, user_id);
		}
		Ok(Started { session, decision })
	}

	/// Applies one traffic report: appends the raw sample, advances the
	/// authoritative counter by the reported delta, and re-prices earnings.
	/// Earnings never decrease while a session runs.
	pub async fn report_traffic(
		&self,
		session_id: &str,
		report: &TrafficReport<'_>,
	) -> PfResult<Session> {
		if !report.delta_mb.is_finite() || report.delta_mb < 0.0 {
			return Err(Error::Validation("report delta must be non-negative".into()));
		}
		if !report.cumulative_mb.is_finite() || report.cumulative_mb < 0.0 {
			return Err(Error::Validation("report cumulative must be non-negative".into()));
		}

		let _guard = self.locks.lock(session_id.into()).await;
		let mut session = self.store.read_session(session_id).await?;
		if session.status != SessionStatus::Active {
			return Err(Error::StateConflict("session_not_active"));
		}

		let recorded_at = now();
		let sequence = self
			.store
			.append_report(&CreateReport {
				s_id: session.s_id,
				delta_mb: report.delta_mb,
				cumulative_mb: report.cumulative_mb,
				speed_mbps: report.speed_mbps,
				network_type: report.network_type,
				battery_level: report.battery_level,
				recorded_at,
			})
			.await?;

		session.server_mb += report.delta_mb;
		session.client_mb = session.client_mb.max(report.cumulative_mb);
		let rate = self.pricing.rate_for(&session.accrual_date).await?;
		session.earned = Usd::price_mb(session.server_mb, rate).max(session.earned);
		session.last_report_at = Some(recorded_at);

		self.store
			.update_session_counters(
				session_id,
				session.server_mb,
				session.client_mb,
				session.earned,
				recorded_at,
			)
			.await?;
		debug!(
			"session {} report #{}: +{:.3} MB, {:.3} MB total, {} earned",
			session_id, sequence, report.delta_mb, session.server_mb, session.earned
		);
		Ok(session)
	}

	/// Liveness signal without traffic. Keeps the session off the orphan
	/// sweep's radar.
	pub async fn heartbeat(&self, session_id: &str) -> PfResult<()> {
		let _guard = self.locks.lock(session_id.into()).await;
		let session = self.store.read_session(session_id).await?;
		if session.status != SessionStatus::Active {
			return Err(Error::StateConflict("session_not_active"));
		}
		self.store.touch_session(session_id, now()).await
	}

	/// Stops a session and settles its earnings. Stopping an already
	/// completed session is an idempotent no-op returning the final state;
	/// stopping a failed or cancelled one is a conflict.
	pub async fn stop(&self, session_id: &str) -> PfResult<Session> {
		let _guard = self.locks.lock(session_id.into()).await;
		let mut session = self.store.read_session(session_id).await?;
		match session.status {
			SessionStatus::Active => {
				let end_time = now();
				if !self.store.close_session(session_id, SessionStatus::Completed, end_time).await?
				{
					// lost a race we cannot lose while holding the lock
					return Err(Error::StateConflict("session_not_active"));
				}
				session.status = SessionStatus::Completed;
				session.end_time = Some(end_time);
				self.verify_counter(&mut session).await?;
				self.settle(&session).await?;
				session.settled = true;
				info!(
					"session {} completed: {:.3} MB, {} earned",
					session_id, session.server_mb, session.earned
				);
				Ok(session)
			}
			SessionStatus::Completed => {
				// an earlier stop closed the row but crashed before the
				// settlement landed; the credit is idempotent, so finish it
				if !session.settled {
					self.settle(&session).await?;
					session.settled = true;
				}
				Ok(session)
			}
			_ => Err(Error::StateConflict("session_not_active")),
		}
	}

	/// Closes active sessions whose last sign of life predates the orphan
	/// timeout, settling whatever they earned up to that point. Returns the
	/// number of sessions reclaimed.
	pub async fn reclaim_orphans(&self) -> PfResult<u32> {
		let cutoff = Timestamp(now().0 - self.settings.orphan_timeout_secs);
		let stale = self.store.list_stale_active_sessions(cutoff).await?;
		let mut reclaimed = 0;
		for session in stale {
			let _guard = self.locks.lock(session.session_id.clone()).await;
			if !self
				.store
				.close_session(&session.session_id, SessionStatus::Failed, now())
				.await?
			{
				continue; // closed while we waited for the lock
			}
			// the listing snapshot predates the lock; reports may have landed
			// in between, so settle from the row as it was actually closed
			let session = self.store.read_session(&session.session_id).await?;
			warn!(
				"reclaiming orphaned session {} of user {} ({:.3} MB)",
				session.session_id, session.user_id, session.server_mb
			);
			if let Err(err) = self.settle(&session).await {
				error!("settlement of orphaned session {} failed: {err}", session.session_id);
				continue;
			}
			reclaimed += 1;
		}
		reclaimed += self.settle_stragglers().await?;
		self.locks.prune();
		Ok(reclaimed)
	}

	/// Retries settlement of sessions that were closed but whose settlement
	/// failed mid-way (terminal status, `settled = false`). Returns the number
	/// of sessions settled.
	async fn settle_stragglers(&self) -> PfResult<u32> {
		let mut settled = 0;
		for session in self.store.list_unsettled_closed_sessions().await? {
			let _guard = self.locks.lock(session.session_id.clone()).await;
			let session = self.store.read_session(&session.session_id).await?;
			if session.settled || !session.status.is_terminal() {
				continue;
			}
			warn!("retrying settlement of session {}", session.session_id);
			if let Err(err) = self.settle(&session).await {
				error!("settlement retry of session {} failed: {err}", session.session_id);
				continue;
			}
			settled += 1;
		}
		Ok(settled)
	}

	/// Synchronous stop-time check: the counter must agree with the sum of
	/// raw report deltas within tolerance, or it is rewritten from the
	/// reports before settlement prices anything.
	async fn verify_counter(&self, session: &mut Session) -> PfResult<()> {
		let expected = self.store.sum_report_deltas(session.s_id).await?;
		let tolerance = (session.server_mb * self.reconcile.tolerance_percent / 100.0)
			.max(self.reconcile.tolerance_floor_mb);
		if (expected - session.server_mb).abs() <= tolerance {
			return Ok(());
		}
		warn!(
			"session {} closing with counter drift: {:.3} MB recorded vs {:.3} MB reported",
			session.session_id, session.server_mb, expected
		);
		let rate = self.pricing.rate_for(&session.accrual_date).await?;
		session.server_mb = expected;
		session.earned = Usd::price_mb(expected, rate);
		self.store
			.rewrite_session_counter(&session.session_id, session.server_mb, session.earned)
			.await
	}

	/// Settles a closed session: the earnings credit (idempotent on the
	/// session id), lifetime counters, the settled flag, then a post-commit
	/// notification. The credit goes first so a failure later in the sequence
	/// leaves a replayable state: the retry's credit dedupes on the reference
	/// and the remaining steps run again.
	async fn settle(&self, session: &Session) -> PfResult<()> {
		if session.earned.is_positive() {
			self.ledger
				.credit(
					session.user_id,
					session.earned,
					LedgerReason::SessionSettlement,
					Some(&session.session_id),
				)
				.await?;
		}
		self.store
			.add_lifetime_traffic(session.user_id, session.server_mb, session.client_mb)
			.await?;
		self.store.mark_session_settled(&session.session_id).await?;

		let notify = Arc::clone(&self.notify);
		let user_id = session.user_id;
		let payload = serde_json::json!({
			"sessionId": &*session.session_id,
			"serverMb": session.server_mb,
			"earned": session.earned,
		});
		tokio::spawn(async move {
			notify.notify(user_id, NotifyKind::SessionSettled, payload).await;
		});
		Ok(())
	}

	pub async fn read(&self, session_id: &str) -> PfResult<Session> {
		self.store.read_session(session_id).await
	}

	pub async fn list_active(&self, user_id: Option<UserId>) -> PfResult<Vec<Session>> {
		self.store.list_active_sessions(user_id).await
	}

	pub async fn list(&self, user_id: UserId, limit: u32, offset: u32) -> PfResult<Vec<Session>> {
		self.store.list_sessions(user_id, limit, offset).await
	}

	/// Today / last-7-days aggregates over the user's recent sessions.
	pub async fn summary(&self, user_id: UserId) -> PfResult<SessionSummary> {
		let at = now();
		let today = pricing::day_start(at);
		let week = Timestamp(today.0 - 6 * 86_400);
		let sessions = self.store.list_sessions(user_id, 500, 0).await?;

		let mut summary = SessionSummary {
			today_sessions: 0,
			today_mb: 0.0,
			today_earned: Usd::ZERO,
			week_sessions: 0,
			week_mb: 0.0,
			week_earned: Usd::ZERO,
		};
		for s in sessions {
			if s.start_time < week || s.status == SessionStatus::Failed {
				continue;
			}
			summary.week_sessions += 1;
			summary.week_mb += s.server_mb;
			summary.week_earned = summary.week_earned + s.earned;
			if s.start_time >= today {
				summary.today_sessions += 1;
				summary.today_mb += s.server_mb;
				summary.today_earned = summary.today_earned + s.earned;
			}
		}
		Ok(summary)
	}
}

// vim: ts=4

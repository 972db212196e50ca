//! Engine wiring and the authenticated API façade.
//!
//! [`AppBuilder`] assembles the engines around the injected adapters;
//! [`Api`] is the surface a transport layer (HTTP, gRPC, CLI) calls into,
//! resolving tokens through the identity adapter and enforcing ownership
//! and operator permissions before touching the engines.

use std::sync::Arc;

use peerflow_types::identity_adapter::{Caller, IdentityAdapter};
use peerflow_types::notify_adapter::NotifyAdapter;
use peerflow_types::payout_adapter::{PayoutAdapter, PayoutStatus};
use peerflow_types::prelude::*;
use peerflow_types::reputation_adapter::IpReputationAdapter;
use peerflow_types::store_adapter::{
	DailyPrice, LedgerEntry, LedgerReason, Session, StoreAdapter, User, Withdrawal,
};

use crate::admission::AdmissionFilter;
use crate::keyed_lock::KeyedLock;
use crate::ledger::{BalanceLedger, BalanceOverview};
use crate::pricing::PricingOracle;
use crate::reconcile::ReconciliationEngine;
use crate::session::{SessionEngine, SessionSummary, StartSession, Started, TrafficReport};
use crate::settings::Settings;
use crate::withdraw::{CreateWithdrawal, WithdrawalEngine};

#[derive(Debug)]
pub struct AppState {
	pub settings: Settings,
	pub store: Arc<dyn StoreAdapter>,
	pub identity: Arc<dyn IdentityAdapter>,
	pub admission: Arc<AdmissionFilter>,
	pub pricing: Arc<PricingOracle>,
	pub ledger: Arc<BalanceLedger>,
	pub sessions: Arc<SessionEngine>,
	pub withdrawals: Arc<WithdrawalEngine>,
	pub reconciliation: Arc<ReconciliationEngine>,
}

pub type App = Arc<AppState>;

/// Collects the adapters, then wires the engines in dependency order.
#[derive(Debug, Default)]
pub struct AppBuilder {
	settings: Settings,
	store: Option<Arc<dyn StoreAdapter>>,
	identity: Option<Arc<dyn IdentityAdapter>>,
	reputation: Option<Arc<dyn IpReputationAdapter>>,
	payout: Option<Arc<dyn PayoutAdapter>>,
	notify: Option<Arc<dyn NotifyAdapter>>,
}

impl AppBuilder {
	pub fn new(settings: Settings) -> Self {
		AppBuilder { settings, ..Default::default() }
	}

	pub fn store(mut self, store: Arc<dyn StoreAdapter>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn identity(mut self, identity: Arc<dyn IdentityAdapter>) -> Self {
		self.identity = Some(identity);
		self
	}

	pub fn reputation(mut self, reputation: Arc<dyn IpReputationAdapter>) -> Self {
		self.reputation = Some(reputation);
		self
	}

	pub fn payout(mut self, payout: Arc<dyn PayoutAdapter>) -> Self {
		self.payout = Some(payout);
		self
	}

	pub fn notify(mut self, notify: Arc<dyn NotifyAdapter>) -> Self {
		self.notify = Some(notify);
		self
	}

	pub fn build(self) -> PfResult<App> {
		fn missing(adapter: &'static str) -> Error {
			Error::Internal(format!("AppBuilder: no {adapter} adapter configured"))
		}

		let settings = self.settings;
		let store = self.store.ok_or_else(|| missing("store"))?;
		let identity = self.identity.ok_or_else(|| missing("identity"))?;
		let reputation = self.reputation.ok_or_else(|| missing("reputation"))?;
		let payout = self.payout.ok_or_else(|| missing("payout"))?;
		let notify = self.notify.ok_or_else(|| missing("notify"))?;

		let user_locks = Arc::new(KeyedLock::new());
		let session_locks = Arc::new(KeyedLock::new());

		let admission = Arc::new(AdmissionFilter::new(
			settings.admission.clone(),
			store.clone(),
			reputation,
		));
		let pricing = Arc::new(PricingOracle::new(store.clone(), settings.pricing.clone()));
		let ledger = Arc::new(BalanceLedger::new(store.clone(), user_locks));
		let sessions = Arc::new(SessionEngine::new(
			store.clone(),
			admission.clone(),
			pricing.clone(),
			ledger.clone(),
			notify.clone(),
			settings.session.clone(),
			settings.reconcile.clone(),
			session_locks.clone(),
		));
		let withdrawals = Arc::new(WithdrawalEngine::new(
			store.clone(),
			ledger.clone(),
			payout,
			notify,
			settings.withdraw.clone(),
		));
		let reconciliation = Arc::new(ReconciliationEngine::new(
			store.clone(),
			pricing.clone(),
			ledger.clone(),
			settings.reconcile.clone(),
			session_locks,
		));

		Ok(Arc::new(AppState {
			settings,
			store,
			identity,
			admission,
			pricing,
			ledger,
			sessions,
			withdrawals,
			reconciliation,
		}))
	}
}

/// Token-authenticated entry points.
#[derive(Clone, Debug)]
pub struct Api {
	app: App,
}

impl Api {
	pub fn new(app: App) -> Self {
		Api { app }
	}

	pub fn app(&self) -> &App {
		&self.app
	}

	async fn caller(&self, token: &str) -> PfResult<Caller> {
		self.app.identity.resolve(token).await
	}

	async fn require_admin(&self, token: &str) -> PfResult<Caller> {
		let caller = self.caller(token).await?;
		if !caller.is_admin {
			return Err(Error::PermissionDenied);
		}
		Ok(caller)
	}

	/// Loads a session the caller may act on: their own, or any for admins.
	async fn owned_session(&self, caller: &Caller, session_id: &str) -> PfResult<Session> {
		let session = self.app.store.read_session(session_id).await?;
		if session.user_id != caller.user_id && !caller.is_admin {
			return Err(Error::PermissionDenied);
		}
		Ok(session)
	}

	// Sessions
	// =========

	pub async fn start_session(
		&self,
		token: &str,
		data: &StartSession<'_>,
	) -> PfResult<Started> {
		let caller = self.caller(token).await?;
		self.app.sessions.start(caller.user_id, data, caller.is_admin).await
	}

	pub async fn report_traffic(
		&self,
		token: &str,
		session_id: &str,
		report: &TrafficReport<'_>,
	) -> PfResult<Session> {
		let caller = self.caller(token).await?;
		self.owned_session(&caller, session_id).await?;
		self.app.sessions.report_traffic(session_id, report).await
	}

	pub async fn heartbeat(&self, token: &str, session_id: &str) -> PfResult<()> {
		let caller = self.caller(token).await?;
		self.owned_session(&caller, session_id).await?;
		self.app.sessions.heartbeat(session_id).await
	}

	pub async fn stop_session(&self, token: &str, session_id: &str) -> PfResult<Session> {
		let caller = self.caller(token).await?;
		self.owned_session(&caller, session_id).await?;
		self.app.sessions.stop(session_id).await
	}

	pub async fn get_session(&self, token: &str, session_id: &str) -> PfResult<Session> {
		let caller = self.caller(token).await?;
		self.owned_session(&caller, session_id).await
	}

	pub async fn list_sessions(
		&self,
		token: &str,
		limit: u32,
		offset: u32,
	) -> PfResult<Vec<Session>> {
		let caller = self.caller(token).await?;
		self.app.sessions.list(caller.user_id, limit, offset).await
	}

	pub async fn list_active_sessions(&self, token: &str) -> PfResult<Vec<Session>> {
		let caller = self.caller(token).await?;
		if caller.is_admin {
			self.app.sessions.list_active(None).await
		} else {
			self.app.sessions.list_active(Some(caller.user_id)).await
		}
	}

	pub async fn session_summary(&self, token: &str) -> PfResult<SessionSummary> {
		let caller = self.caller(token).await?;
		self.app.sessions.summary(caller.user_id).await
	}

	// Balance
	// ========

	pub async fn balance_overview(&self, token: &str) -> PfResult<BalanceOverview> {
		let caller = self.caller(token).await?;
		self.app.ledger.overview(caller.user_id).await
	}

	pub async fn ledger_entries(&self, token: &str, limit: u32) -> PfResult<Vec<LedgerEntry>> {
		let caller = self.caller(token).await?;
		self.app.store.list_ledger_entries(caller.user_id, limit).await
	}

	// Withdrawals
	// ============

	/// Creates the withdrawal and dispatches it to the provider in the same
	/// call; a slow provider degrades to the poll sweep, never blocks the
	/// caller past the configured deadline.
	pub async fn create_withdrawal(
		&self,
		token: &str,
		req: &CreateWithdrawal<'_>,
	) -> PfResult<Withdrawal> {
		let caller = self.caller(token).await?;
		let withdrawal = self.app.withdrawals.create(caller.user_id, req).await?;
		self.app.withdrawals.dispatch(withdrawal.withdrawal_id).await?;
		self.app.withdrawals.read(withdrawal.withdrawal_id).await
	}

	pub async fn get_withdrawal(&self, token: &str, withdrawal_id: i64) -> PfResult<Withdrawal> {
		let caller = self.caller(token).await?;
		let withdrawal = self.app.withdrawals.read(withdrawal_id).await?;
		if withdrawal.user_id != caller.user_id && !caller.is_admin {
			return Err(Error::PermissionDenied);
		}
		Ok(withdrawal)
	}

	pub async fn list_withdrawals(&self, token: &str, limit: u32) -> PfResult<Vec<Withdrawal>> {
		let caller = self.caller(token).await?;
		self.app.withdrawals.list(caller.user_id, limit).await
	}

	/// Provider webhook relay. The transport authenticates the provider
	/// (signature check) before calling this.
	pub async fn provider_callback(
		&self,
		payout_id: &str,
		status: &PayoutStatus,
	) -> PfResult<()> {
		self.app.withdrawals.apply_provider_callback(payout_id, status).await
	}

	// Operator surface
	// =================

	pub async fn cancel_withdrawal(
		&self,
		token: &str,
		withdrawal_id: i64,
	) -> PfResult<Withdrawal> {
		self.require_admin(token).await?;
		self.app.withdrawals.cancel(withdrawal_id).await
	}

	pub async fn set_daily_rate(
		&self,
		token: &str,
		date: &str,
		rate: Usd,
		message: Option<&str>,
	) -> PfResult<DailyPrice> {
		self.require_admin(token).await?;
		self.app.pricing.set_rate(date, rate, message).await
	}

	pub async fn adjust_balance(
		&self,
		token: &str,
		user_id: UserId,
		delta: Usd,
		reference: &str,
	) -> PfResult<LedgerEntry> {
		self.require_admin(token).await?;
		self.app.ledger.adjust(user_id, delta, LedgerReason::AdminAdjustment, reference).await
	}

	pub async fn get_user(&self, token: &str, user_id: UserId) -> PfResult<User> {
		let caller = self.caller(token).await?;
		if user_id != caller.user_id && !caller.is_admin {
			return Err(Error::PermissionDenied);
		}
		self.app.store.read_user(user_id).await
	}
}

// vim: ts=4

//! In-memory adapters backing the engine integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use peerflow_core::app::{Api, App, AppBuilder};
use peerflow_core::settings::Settings;
use peerflow_types::identity_adapter::{Caller, IdentityAdapter};
use peerflow_types::notify_adapter::{NotifyAdapter, NotifyKind};
use peerflow_types::payout_adapter::{
	PayoutAdapter, PayoutReceipt, PayoutState, PayoutStatus, SubmitPayout,
};
use peerflow_types::prelude::*;
use peerflow_types::reputation_adapter::{IpReputation, IpReputationAdapter};
use peerflow_types::store_adapter::*;

// MemStore
//**********

#[derive(Debug, Default)]
struct MemStoreInner {
	users: Vec<User>,
	sessions: Vec<Session>,
	reports: Vec<Report>,
	audits: Vec<serde_json::Value>,
	ledger: Vec<LedgerEntry>,
	withdrawals: Vec<Withdrawal>,
	prices: Vec<DailyPrice>,
	next_id: i64,
}

impl MemStoreInner {
	fn next_id(&mut self) -> i64 {
		self.next_id += 1;
		self.next_id
	}
}

/// Full in-memory `StoreAdapter`, honoring the same uniqueness guarantees
/// the sqlite adapter enforces with indexes.
#[derive(Debug, Default)]
pub struct MemStore {
	inner: Mutex<MemStoreInner>,
	failures: Mutex<Vec<&'static str>>,
	late_reports: Mutex<Vec<(Box<str>, f64, Usd)>>,
}

impl MemStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Test hook: shifts a session's liveness timestamps into the past.
	pub fn backdate_session(&self, session_id: &str, secs: i64) {
		let mut inner = self.inner.lock();
		if let Some(s) = inner.sessions.iter_mut().find(|s| &*s.session_id == session_id) {
			s.start_time = Timestamp(s.start_time.0 - secs);
			s.last_report_at = s.last_report_at.map(|t| Timestamp(t.0 - secs));
		}
	}

	/// Test hook: corrupts the cached balance without a ledger entry.
	pub fn corrupt_balance(&self, user_id: UserId, balance: Usd) {
		let mut inner = self.inner.lock();
		if let Some(u) = inner.users.iter_mut().find(|u| u.user_id == user_id) {
			u.balance = balance;
		}
	}

	/// Test hook: overwrites a session counter as if reports were lost.
	pub fn corrupt_session_counter(&self, session_id: &str, server_mb: f64) {
		let mut inner = self.inner.lock();
		if let Some(s) = inner.sessions.iter_mut().find(|s| &*s.session_id == session_id) {
			s.server_mb = server_mb;
		}
	}

	/// Test hook: makes the next call of the named operation fail once.
	pub fn fail_once(&self, op: &'static str) {
		self.failures.lock().push(op);
	}

	fn trip(&self, op: &'static str) -> PfResult<()> {
		let mut failures = self.failures.lock();
		if let Some(pos) = failures.iter().position(|o| *o == op) {
			failures.remove(pos);
			return Err(Error::DbError);
		}
		Ok(())
	}

	/// Test hook: lands one more report on a session the moment the orphan
	/// sweep lists it, as a client racing the sweep would.
	pub fn inject_report_on_stale_list(&self, session_id: &str, delta_mb: f64, earned: Usd) {
		self.late_reports.lock().push((session_id.into(), delta_mb, earned));
	}

	pub fn audit_count(&self) -> usize {
		self.inner.lock().audits.len()
	}

	pub fn ledger_len(&self) -> usize {
		self.inner.lock().ledger.len()
	}
}

#[async_trait]
impl StoreAdapter for MemStore {
	async fn read_user(&self, user_id: UserId) -> PfResult<User> {
		self.inner
			.lock()
			.users
			.iter()
			.find(|u| u.user_id == user_id)
			.cloned()
			.ok_or(Error::NotFound)
	}

	async fn list_user_ids(&self) -> PfResult<Vec<UserId>> {
		Ok(self.inner.lock().users.iter().map(|u| u.user_id).collect())
	}

	async fn create_user(&self, user_id: UserId, is_admin: bool) -> PfResult<User> {
		let mut inner = self.inner.lock();
		if inner.users.iter().any(|u| u.user_id == user_id) {
			return Err(Error::StateConflict("user_exists"));
		}
		let user = User {
			user_id,
			balance: Usd::ZERO,
			sent_mb: 0.0,
			used_mb: 0.0,
			is_admin,
			active: true,
			created_at: now(),
		};
		inner.users.push(user.clone());
		Ok(user)
	}

	async fn set_user_active(&self, user_id: UserId, active: bool) -> PfResult<()> {
		let mut inner = self.inner.lock();
		let user = inner.users.iter_mut().find(|u| u.user_id == user_id).ok_or(Error::NotFound)?;
		user.active = active;
		Ok(())
	}

	async fn add_lifetime_traffic(
		&self,
		user_id: UserId,
		sent_mb: f64,
		used_mb: f64,
	) -> PfResult<()> {
		self.trip("add_lifetime_traffic")?;
		let mut inner = self.inner.lock();
		let user = inner.users.iter_mut().find(|u| u.user_id == user_id).ok_or(Error::NotFound)?;
		user.sent_mb += sent_mb;
		user.used_mb += used_mb;
		Ok(())
	}

	async fn create_session(&self, data: &CreateSession<'_>) -> PfResult<Session> {
		let mut inner = self.inner.lock();
		if data.status == SessionStatus::Active
			&& inner
				.sessions
				.iter()
				.any(|s| s.user_id == data.user_id && s.status == SessionStatus::Active)
		{
			return Err(Error::StateConflict("session_already_active"));
		}
		if inner.sessions.iter().any(|s| &*s.session_id == data.session_id) {
			return Err(Error::StateConflict("duplicate_session_id"));
		}
		let s_id = inner.next_id();
		let session = Session {
			s_id,
			session_id: data.session_id.into(),
			user_id: data.user_id,
			start_time: data.start_time,
			end_time: None,
			status: data.status,
			filter_status: data.filter_status,
			filter_reasons: data.filter_reasons.to_vec().into(),
			client_mb: 0.0,
			server_mb: 0.0,
			earned: Usd::ZERO,
			accrual_date: data.accrual_date.into(),
			device_id: data.device_id.map(Into::into),
			client_ip: data.client_ip.map(Into::into),
			network_type: data.network_type.map(Into::into),
			app_version: data.app_version.map(Into::into),
			os: data.os.map(Into::into),
			battery_level: data.battery_level,
			last_report_at: None,
			settled: false,
		};
		inner.sessions.push(session.clone());
		Ok(session)
	}

	async fn read_session(&self, session_id: &str) -> PfResult<Session> {
		self.inner
			.lock()
			.sessions
			.iter()
			.find(|s| &*s.session_id == session_id)
			.cloned()
			.ok_or(Error::NotFound)
	}

	async fn list_active_sessions(&self, user_id: Option<UserId>) -> PfResult<Vec<Session>> {
		Ok(self
			.inner
			.lock()
			.sessions
			.iter()
			.filter(|s| s.status == SessionStatus::Active)
			.filter(|s| user_id.is_none_or(|u| s.user_id == u))
			.cloned()
			.collect())
	}

	async fn list_sessions(
		&self,
		user_id: UserId,
		limit: u32,
		offset: u32,
	) -> PfResult<Vec<Session>> {
		let mut sessions: Vec<Session> = self
			.inner
			.lock()
			.sessions
			.iter()
			.filter(|s| s.user_id == user_id)
			.cloned()
			.collect();
		sessions.sort_by_key(|s| std::cmp::Reverse(s.start_time));
		Ok(sessions.into_iter().skip(offset as usize).take(limit as usize).collect())
	}

	async fn list_stale_active_sessions(&self, cutoff: Timestamp) -> PfResult<Vec<Session>> {
		let mut inner = self.inner.lock();
		let stale: Vec<Session> = inner
			.sessions
			.iter()
			.filter(|s| s.status == SessionStatus::Active)
			.filter(|s| s.last_report_at.unwrap_or(s.start_time) < cutoff)
			.cloned()
			.collect();
		for (session_id, delta_mb, earned) in self.late_reports.lock().drain(..) {
			let Some(pos) = inner.sessions.iter().position(|s| s.session_id == session_id) else {
				continue;
			};
			let report_id = inner.next_id();
			let s_id = inner.sessions[pos].s_id;
			let sequence = inner.reports.iter().filter(|r| r.s_id == s_id).count() as u32 + 1;
			inner.reports.push(Report {
				report_id,
				s_id,
				sequence_number: sequence,
				delta_mb,
				cumulative_mb: 0.0,
				speed_mbps: None,
				network_type: None,
				battery_level: None,
				recorded_at: now(),
			});
			let session = &mut inner.sessions[pos];
			session.server_mb += delta_mb;
			session.earned = earned;
		}
		Ok(stale)
	}

	async fn list_completed_sessions_since(&self, since: Timestamp) -> PfResult<Vec<Session>> {
		Ok(self
			.inner
			.lock()
			.sessions
			.iter()
			.filter(|s| s.status == SessionStatus::Completed)
			.filter(|s| s.end_time.unwrap_or(s.start_time) >= since)
			.cloned()
			.collect())
	}

	async fn list_unsettled_closed_sessions(&self) -> PfResult<Vec<Session>> {
		Ok(self
			.inner
			.lock()
			.sessions
			.iter()
			.filter(|s| s.status.is_terminal() && !s.settled && s.end_time.is_some())
			.cloned()
			.collect())
	}

	async fn update_session_counters(
		&self,
		session_id: &str,
		server_mb: f64,
		client_mb: f64,
		earned: Usd,
		last_report_at: Timestamp,
	) -> PfResult<()> {
		let mut inner = self.inner.lock();
		let session = inner
			.sessions
			.iter_mut()
			.find(|s| &*s.session_id == session_id)
			.ok_or(Error::NotFound)?;
		session.server_mb = server_mb;
		session.client_mb = client_mb;
		session.earned = earned;
		session.last_report_at = Some(last_report_at);
		Ok(())
	}

	async fn rewrite_session_counter(
		&self,
		session_id: &str,
		server_mb: f64,
		earned: Usd,
	) -> PfResult<()> {
		let mut inner = self.inner.lock();
		let session = inner
			.sessions
			.iter_mut()
			.find(|s| &*s.session_id == session_id)
			.ok_or(Error::NotFound)?;
		session.server_mb = server_mb;
		session.earned = earned;
		Ok(())
	}

	async fn touch_session(&self, session_id: &str, at: Timestamp) -> PfResult<()> {
		let mut inner = self.inner.lock();
		let session = inner
			.sessions
			.iter_mut()
			.find(|s| &*s.session_id == session_id)
			.ok_or(Error::NotFound)?;
		session.last_report_at = Some(at);
		Ok(())
	}

	async fn close_session(
		&self,
		session_id: &str,
		status: SessionStatus,
		end_time: Timestamp,
	) -> PfResult<bool> {
		let mut inner = self.inner.lock();
		let session = inner
			.sessions
			.iter_mut()
			.find(|s| &*s.session_id == session_id)
			.ok_or(Error::NotFound)?;
		if session.status != SessionStatus::Active {
			return Ok(false);
		}
		session.status = status;
		session.end_time = Some(end_time);
		Ok(true)
	}

	async fn mark_session_settled(&self, session_id: &str) -> PfResult<bool> {
		self.trip("mark_session_settled")?;
		let mut inner = self.inner.lock();
		let session = inner
			.sessions
			.iter_mut()
			.find(|s| &*s.session_id == session_id)
			.ok_or(Error::NotFound)?;
		if session.settled {
			return Ok(false);
		}
		session.settled = true;
		Ok(true)
	}

	async fn append_report(&self, data: &CreateReport<'_>) -> PfResult<u32> {
		let mut inner = self.inner.lock();
		let sequence = inner.reports.iter().filter(|r| r.s_id == data.s_id).count() as u32 + 1;
		let report_id = inner.next_id();
		inner.reports.push(Report {
			report_id,
			s_id: data.s_id,
			sequence_number: sequence,
			delta_mb: data.delta_mb,
			cumulative_mb: data.cumulative_mb,
			speed_mbps: data.speed_mbps,
			network_type: data.network_type.map(Into::into),
			battery_level: data.battery_level,
			recorded_at: data.recorded_at,
		});
		Ok(sequence)
	}

	async fn list_reports(&self, s_id: i64) -> PfResult<Vec<Report>> {
		Ok(self.inner.lock().reports.iter().filter(|r| r.s_id == s_id).cloned().collect())
	}

	async fn sum_report_deltas(&self, s_id: i64) -> PfResult<f64> {
		Ok(self
			.inner
			.lock()
			.reports
			.iter()
			.filter(|r| r.s_id == s_id)
			.map(|r| r.delta_mb)
			.sum())
	}

	async fn append_filter_audit(&self, data: &CreateFilterAudit<'_>) -> PfResult<i64> {
		let mut inner = self.inner.lock();
		let id = inner.next_id();
		inner.audits.push(serde_json::json!({
			"userId": data.user_id,
			"sessionId": data.session_id,
			"allowed": data.allowed,
			"reasons": data.reasons,
		}));
		Ok(id)
	}

	async fn apply_balance_delta(
		&self,
		user_id: UserId,
		delta: Usd,
		reason: LedgerReason,
		reference: Option<&str>,
	) -> PfResult<LedgerEntry> {
		self.trip("apply_balance_delta")?;
		let mut inner = self.inner.lock();
		if let Some(reference) = reference {
			if inner
				.ledger
				.iter()
				.any(|e| e.reason == reason && e.reference.as_deref() == Some(reference))
			{
				return Err(Error::StateConflict("duplicate_ledger_reference"));
			}
		}
		let entry_id = inner.next_id();
		let user = inner.users.iter_mut().find(|u| u.user_id == user_id).ok_or(Error::NotFound)?;
		let previous_balance = user.balance;
		user.balance = user.balance + delta;
		let entry = LedgerEntry {
			entry_id,
			user_id,
			previous_balance,
			new_balance: previous_balance + delta,
			delta,
			reason,
			reference: reference.map(Into::into),
			created_at: now(),
		};
		inner.ledger.push(entry.clone());
		Ok(entry)
	}

	async fn rewrite_balance(
		&self,
		user_id: UserId,
		new_balance: Usd,
		reason: LedgerReason,
	) -> PfResult<LedgerEntry> {
		let mut inner = self.inner.lock();
		let entry_id = inner.next_id();
		let user = inner.users.iter_mut().find(|u| u.user_id == user_id).ok_or(Error::NotFound)?;
		let previous_balance = user.balance;
		user.balance = new_balance;
		let entry = LedgerEntry {
			entry_id,
			user_id,
			previous_balance,
			new_balance,
			delta: Usd::ZERO,
			reason,
			reference: None,
			created_at: now(),
		};
		inner.ledger.push(entry.clone());
		Ok(entry)
	}

	async fn find_ledger_entry(
		&self,
		reference: &str,
		reason: LedgerReason,
	) -> PfResult<Option<LedgerEntry>> {
		Ok(self
			.inner
			.lock()
			.ledger
			.iter()
			.find(|e| e.reason == reason && e.reference.as_deref() == Some(reference))
			.cloned())
	}

	async fn list_ledger_entries(&self, user_id: UserId, limit: u32) -> PfResult<Vec<LedgerEntry>> {
		let mut entries: Vec<LedgerEntry> = self
			.inner
			.lock()
			.ledger
			.iter()
			.filter(|e| e.user_id == user_id)
			.cloned()
			.collect();
		entries.sort_by_key(|e| std::cmp::Reverse(e.entry_id));
		entries.truncate(limit as usize);
		Ok(entries)
	}

	async fn sum_ledger_deltas(&self, user_id: UserId) -> PfResult<Usd> {
		Ok(self
			.inner
			.lock()
			.ledger
			.iter()
			.filter(|e| e.user_id == user_id)
			.fold(Usd::ZERO, |acc, e| acc + e.delta))
	}

	async fn sum_income_since(&self, user_id: UserId, since: Timestamp) -> PfResult<Usd> {
		Ok(self
			.inner
			.lock()
			.ledger
			.iter()
			.filter(|e| e.user_id == user_id && e.delta.is_positive() && e.created_at >= since)
			.fold(Usd::ZERO, |acc, e| acc + e.delta))
	}

	async fn create_withdrawal(&self, data: &CreateWithdrawalData<'_>) -> PfResult<Withdrawal> {
		let mut inner = self.inner.lock();
		if inner.withdrawals.iter().any(|w| &*w.idempotency_key == data.idempotency_key) {
			return Err(Error::StateConflict("duplicate_idempotency_key"));
		}
		let withdrawal_id = inner.next_id();
		let withdrawal = Withdrawal {
			withdrawal_id,
			user_id: data.user_id,
			amount: data.amount,
			wallet_address: data.wallet_address.into(),
			network: data.network.into(),
			status: WithdrawalStatus::Pending,
			idempotency_key: data.idempotency_key.into(),
			reserved: true,
			payout_id: None,
			tx_hash: None,
			note: None,
			created_at: data.created_at,
			processed_at: None,
		};
		inner.withdrawals.push(withdrawal.clone());
		Ok(withdrawal)
	}

	async fn read_withdrawal(&self, withdrawal_id: i64) -> PfResult<Withdrawal> {
		self.inner
			.lock()
			.withdrawals
			.iter()
			.find(|w| w.withdrawal_id == withdrawal_id)
			.cloned()
			.ok_or(Error::NotFound)
	}

	async fn find_withdrawal_by_key(&self, idempotency_key: &str) -> PfResult<Option<Withdrawal>> {
		Ok(self
			.inner
			.lock()
			.withdrawals
			.iter()
			.find(|w| &*w.idempotency_key == idempotency_key)
			.cloned())
	}

	async fn find_withdrawal_by_payout(&self, payout_id: &str) -> PfResult<Option<Withdrawal>> {
		Ok(self
			.inner
			.lock()
			.withdrawals
			.iter()
			.find(|w| w.payout_id.as_deref() == Some(payout_id))
			.cloned())
	}

	async fn transition_withdrawal(
		&self,
		withdrawal_id: i64,
		transition: &WithdrawalTransition<'_>,
	) -> PfResult<bool> {
		let mut inner = self.inner.lock();
		let withdrawal = inner
			.withdrawals
			.iter_mut()
			.find(|w| w.withdrawal_id == withdrawal_id)
			.ok_or(Error::NotFound)?;
		if !transition.from.contains(&withdrawal.status) {
			return Ok(false);
		}
		withdrawal.status = transition.to;
		if let Some(payout_id) = transition.payout_id {
			withdrawal.payout_id = Some(payout_id.into());
		}
		if let Some(tx_hash) = transition.tx_hash {
			withdrawal.tx_hash = Some(tx_hash.into());
		}
		if let Some(note) = transition.note {
			withdrawal.note = Some(note.into());
		}
		if transition.processed_at.is_some() {
			withdrawal.processed_at = transition.processed_at;
		}
		Ok(true)
	}

	async fn clear_withdrawal_reserved(&self, withdrawal_id: i64) -> PfResult<bool> {
		let mut inner = self.inner.lock();
		let withdrawal = inner
			.withdrawals
			.iter_mut()
			.find(|w| w.withdrawal_id == withdrawal_id)
			.ok_or(Error::NotFound)?;
		if !withdrawal.reserved {
			return Ok(false);
		}
		withdrawal.reserved = false;
		Ok(true)
	}

	async fn list_withdrawals(&self, user_id: UserId, limit: u32) -> PfResult<Vec<Withdrawal>> {
		let mut withdrawals: Vec<Withdrawal> = self
			.inner
			.lock()
			.withdrawals
			.iter()
			.filter(|w| w.user_id == user_id)
			.cloned()
			.collect();
		withdrawals.sort_by_key(|w| std::cmp::Reverse(w.withdrawal_id));
		withdrawals.truncate(limit as usize);
		Ok(withdrawals)
	}

	async fn list_unsettled_withdrawals(&self) -> PfResult<Vec<Withdrawal>> {
		Ok(self
			.inner
			.lock()
			.withdrawals
			.iter()
			.filter(|w| !w.status.is_terminal())
			.cloned()
			.collect())
	}

	async fn read_price_on_or_before(&self, date: &str) -> PfResult<Option<DailyPrice>> {
		Ok(self
			.inner
			.lock()
			.prices
			.iter()
			.filter(|p| &*p.date <= date)
			.max_by(|a, b| a.date.cmp(&b.date))
			.cloned())
	}

	async fn upsert_price(
		&self,
		date: &str,
		rate: Usd,
		message: Option<&str>,
	) -> PfResult<DailyPrice> {
		let mut inner = self.inner.lock();
		inner.prices.retain(|p| &*p.date != date);
		let price = DailyPrice { date: date.into(), rate, message: message.map(Into::into) };
		inner.prices.push(price.clone());
		Ok(price)
	}
}

// MockReputation
//****************

#[derive(Debug)]
enum RepAnswer {
	Reputation(IpReputation),
	Unavailable,
}

#[derive(Debug, Default)]
pub struct MockReputation {
	answers: Mutex<std::collections::HashMap<Box<str>, RepAnswer>>,
	pub lookups: Mutex<u32>,
}

pub fn clean_rep(country: &str) -> IpReputation {
	IpReputation {
		country: country.into(),
		asn: Some("AS7922".into()),
		isp: Some("Comcast Cable".into()),
		is_proxy: false,
		is_datacenter: false,
		vpn_score: 0,
	}
}

impl MockReputation {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn set(&self, ip: &str, rep: IpReputation) {
		self.answers.lock().insert(ip.into(), RepAnswer::Reputation(rep));
	}

	pub fn set_unavailable(&self, ip: &str) {
		self.answers.lock().insert(ip.into(), RepAnswer::Unavailable);
	}
}

#[async_trait]
impl IpReputationAdapter for MockReputation {
	async fn lookup(&self, ip: &str) -> PfResult<IpReputation> {
		*self.lookups.lock() += 1;
		match self.answers.lock().get(ip) {
			Some(RepAnswer::Reputation(rep)) => Ok(rep.clone()),
			Some(RepAnswer::Unavailable) => {
				Err(Error::UpstreamUnavailable("reputation api down".into()))
			}
			None => Ok(clean_rep("US")),
		}
	}
}

// MockPayout
//************

#[derive(Debug)]
pub enum PayoutScript {
	Receipt(PayoutReceipt),
	Unavailable,
	Reject(&'static str),
}

/// Scripted payout provider. Without a script, every submit confirms
/// immediately with a deterministic payout id.
#[derive(Debug, Default)]
pub struct MockPayout {
	submits: Mutex<VecDeque<PayoutScript>>,
	statuses: Mutex<std::collections::HashMap<Box<str>, PayoutStatus>>,
	pub submit_count: Mutex<u32>,
}

impl MockPayout {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn script_submit(&self, script: PayoutScript) {
		self.submits.lock().push_back(script);
	}

	pub fn set_status(&self, payout_id: &str, status: PayoutStatus) {
		self.statuses.lock().insert(payout_id.into(), status);
	}

	pub fn confirmed(tx_hash: &str) -> PayoutStatus {
		PayoutStatus {
			state: PayoutState::Confirmed,
			tx_hash: Some(tx_hash.into()),
			reason: None,
		}
	}

	pub fn failed(reason: &str) -> PayoutStatus {
		PayoutStatus { state: PayoutState::Failed, tx_hash: None, reason: Some(reason.into()) }
	}
}

#[async_trait]
impl PayoutAdapter for MockPayout {
	async fn submit(&self, payout: &SubmitPayout<'_>) -> PfResult<PayoutReceipt> {
		*self.submit_count.lock() += 1;
		match self.submits.lock().pop_front() {
			Some(PayoutScript::Receipt(receipt)) => Ok(receipt),
			Some(PayoutScript::Unavailable) => {
				Err(Error::UpstreamUnavailable("provider down".into()))
			}
			Some(PayoutScript::Reject(reason)) => Err(Error::Validation(reason.into())),
			None => Ok(PayoutReceipt {
				payout_id: format!("pay_{}", payout.idempotency_key).into(),
				status: MockPayout::confirmed("0xdeadbeef"),
			}),
		}
	}

	async fn check_status(&self, payout_id: &str) -> PfResult<PayoutStatus> {
		self.statuses.lock().get(payout_id).cloned().ok_or(Error::NotFound)
	}
}

// RecordingNotify
//*****************

#[derive(Debug, Default)]
pub struct RecordingNotify {
	pub events: Mutex<Vec<(UserId, NotifyKind, serde_json::Value)>>,
}

impl RecordingNotify {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn kinds(&self) -> Vec<NotifyKind> {
		self.events.lock().iter().map(|(_, kind, _)| *kind).collect()
	}
}

#[async_trait]
impl NotifyAdapter for RecordingNotify {
	async fn notify(&self, user_id: UserId, kind: NotifyKind, payload: serde_json::Value) {
		self.events.lock().push((user_id, kind, payload));
	}
}

// TokenIdentity
//***************

/// Resolves `user:<id>` and `admin:<id>` tokens.
#[derive(Debug, Default)]
pub struct TokenIdentity;

#[async_trait]
impl IdentityAdapter for TokenIdentity {
	async fn resolve(&self, token: &str) -> PfResult<Caller> {
		let (role, id) = token.split_once(':').ok_or(Error::PermissionDenied)?;
		let user_id = id.parse().map_err(|_| Error::PermissionDenied)?;
		match role {
			"user" => Ok(Caller { user_id: UserId(user_id), is_admin: false }),
			"admin" => Ok(Caller { user_id: UserId(user_id), is_admin: true }),
			_ => Err(Error::PermissionDenied),
		}
	}
}

// Test context
//**************

pub struct TestCtx {
	pub app: App,
	pub api: Api,
	pub store: Arc<MemStore>,
	pub reputation: Arc<MockReputation>,
	pub payout: Arc<MockPayout>,
	pub notify: Arc<RecordingNotify>,
}

pub async fn build_ctx(settings: Settings) -> TestCtx {
	let store = MemStore::new();
	let reputation = MockReputation::new();
	let payout = MockPayout::new();
	let notify = RecordingNotify::new();
	let app = AppBuilder::new(settings)
		.store(store.clone())
		.identity(Arc::new(TokenIdentity))
		.reputation(reputation.clone())
		.payout(payout.clone())
		.notify(notify.clone())
		.build()
		.expect("app wiring");
	store.create_user(UserId(1), false).await.expect("seed user");
	store.create_user(UserId(9), true).await.expect("seed admin");
	TestCtx { api: Api::new(app.clone()), app, store, reputation, payout, notify }
}

pub async fn ctx() -> TestCtx {
	build_ctx(Settings::default()).await
}

/// Gives spawned fire-and-forget tasks (notifications) a chance to land.
pub async fn settle_tasks() {
	for _ in 0..10 {
		tokio::task::yield_now().await;
	}
}

// vim: ts=4

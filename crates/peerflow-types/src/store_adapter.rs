//! Adapter that persists users, sessions, reports, ledger entries,
//! withdrawal requests, filter audits, and daily prices.
//!
//! Two rules every implementation must uphold:
//! - `LedgerEntry` and `FilterAudit` rows are append-only; no code path may
//!   update or delete them.
//! - [`StoreAdapter::apply_balance_delta`] writes the balance mutation and
//!   its ledger entry in one storage transaction; a balance change without
//!   an entry is the one forbidden state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::prelude::*;

// Session types
// ==============

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
	Pending,
	Active,
	Completed,
	Failed,
	Cancelled,
}

impl SessionStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			SessionStatus::Pending => "pending",
			SessionStatus::Active => "active",
			SessionStatus::Completed => "completed",
			SessionStatus::Failed => "failed",
			SessionStatus::Cancelled => "cancelled",
		}
	}

	pub fn parse(s: &str) -> PfResult<Self> {
		match s {
			"pending" => Ok(SessionStatus::Pending),
			"active" => Ok(SessionStatus::Active),
			"completed" => Ok(SessionStatus::Completed),
			"failed" => Ok(SessionStatus::Failed),
			"cancelled" => Ok(SessionStatus::Cancelled),
			_ => Err(Error::Parse),
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled)
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStatus {
	Pending,
	Passed,
	Failed,
	Skipped,
}

impl FilterStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			FilterStatus::Pending => "pending",
			FilterStatus::Passed => "passed",
			FilterStatus::Failed => "failed",
			FilterStatus::Skipped => "skipped",
		}
	}

	pub fn parse(s: &str) -> PfResult<Self> {
		match s {
			"pending" => Ok(FilterStatus::Pending),
			"passed" => Ok(FilterStatus::Passed),
			"failed" => Ok(FilterStatus::Failed),
			"skipped" => Ok(FilterStatus::Skipped),
			_ => Err(Error::Parse),
		}
	}
}

/// One traffic sharing window.
///
/// `server_mb` is the only counter ever used to compute `earned`;
/// `client_mb` is advisory and kept for drift diagnostics.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
	/// Storage row id, referenced by reports and audits
	pub s_id: i64,
	pub session_id: Box<str>,
	pub user_id: UserId,
	pub start_time: Timestamp,
	pub end_time: Option<Timestamp>,
	pub status: SessionStatus,
	pub filter_status: FilterStatus,
	pub filter_reasons: Box<[Box<str>]>,
	pub client_mb: f64,
	pub server_mb: f64,
	pub earned: Usd,
	/// Calendar date (YYYY-MM-DD) selecting the effective price row
	pub accrual_date: Box<str>,
	pub device_id: Option<Box<str>>,
	pub client_ip: Option<Box<str>>,
	pub network_type: Option<Box<str>>,
	pub app_version: Option<Box<str>>,
	pub os: Option<Box<str>>,
	pub battery_level: Option<i32>,
	pub last_report_at: Option<Timestamp>,
	pub settled: bool,
}

#[derive(Debug)]
pub struct CreateSession<'a> {
	pub session_id: &'a str,
	pub user_id: UserId,
	pub status: SessionStatus,
	pub filter_status: FilterStatus,
	pub filter_reasons: &'a [Box<str>],
	pub accrual_date: &'a str,
	pub start_time: Timestamp,
	pub device_id: Option<&'a str>,
	pub client_ip: Option<&'a str>,
	pub network_type: Option<&'a str>,
	pub app_version: Option<&'a str>,
	pub os: Option<&'a str>,
	pub battery_level: Option<i32>,
}

// Report types
// =============

/// One traffic telemetry sample. Append-only.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
	pub report_id: i64,
	pub s_id: i64,
	pub sequence_number: u32,
	pub delta_mb: f64,
	pub cumulative_mb: f64,
	pub speed_mbps: Option<f64>,
	pub network_type: Option<Box<str>>,
	pub battery_level: Option<i32>,
	pub recorded_at: Timestamp,
}

#[derive(Debug)]
pub struct CreateReport<'a> {
	pub s_id: i64,
	pub delta_mb: f64,
	pub cumulative_mb: f64,
	pub speed_mbps: Option<f64>,
	pub network_type: Option<&'a str>,
	pub battery_level: Option<i32>,
	pub recorded_at: Timestamp,
}

// Filter audit types
// ===================

/// Write-once snapshot of one admission evaluation. The only fraud
/// forensics trail; never updated or deleted.
#[derive(Debug)]
pub struct CreateFilterAudit<'a> {
	pub user_id: UserId,
	pub session_id: Option<&'a str>,
	pub device_id: Option<&'a str>,
	pub client_ip: Option<&'a str>,
	pub country: Option<&'a str>,
	pub asn: Option<&'a str>,
	pub isp: Option<&'a str>,
	pub is_proxy: bool,
	pub is_datacenter: bool,
	pub vpn_score: Option<u8>,
	pub network_type: Option<&'a str>,
	pub allowed: bool,
	pub reasons: &'a [Box<str>],
	pub created_at: Timestamp,
}

// Ledger types
// =============

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
	SessionSettlement,
	WithdrawReserve,
	ReservationRelease,
	EarningsCorrection,
	BalanceDriftCorrection,
	AdminAdjustment,
}

impl LedgerReason {
	pub fn as_str(self) -> &'static str {
		match self {
			LedgerReason::SessionSettlement => "session_settlement",
			LedgerReason::WithdrawReserve => "withdraw_reserve",
			LedgerReason::ReservationRelease => "reservation_release",
			LedgerReason::EarningsCorrection => "earnings_correction",
			LedgerReason::BalanceDriftCorrection => "balance_drift_correction",
			LedgerReason::AdminAdjustment => "admin_adjustment",
		}
	}

	pub fn parse(s: &str) -> PfResult<Self> {
		match s {
			"session_settlement" => Ok(LedgerReason::SessionSettlement),
			"withdraw_reserve" => Ok(LedgerReason::WithdrawReserve),
			"reservation_release" => Ok(LedgerReason::ReservationRelease),
			"earnings_correction" => Ok(LedgerReason::EarningsCorrection),
			"balance_drift_correction" => Ok(LedgerReason::BalanceDriftCorrection),
			"admin_adjustment" => Ok(LedgerReason::AdminAdjustment),
			_ => Err(Error::Parse),
		}
	}
}

/// Immutable record of one balance mutation.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
	pub entry_id: i64,
	pub user_id: UserId,
	pub previous_balance: Usd,
	pub new_balance: Usd,
	pub delta: Usd,
	pub reason: LedgerReason,
	pub reference: Option<Box<str>>,
	pub created_at: Timestamp,
}

// Withdrawal types
// =================

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
	Pending,
	Processing,
	Completed,
	Failed,
	Cancelled,
}

impl WithdrawalStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			WithdrawalStatus::Pending => "pending",
			WithdrawalStatus::Processing => "processing",
			WithdrawalStatus::Completed => "completed",
			WithdrawalStatus::Failed => "failed",
			WithdrawalStatus::Cancelled => "cancelled",
		}
	}

	pub fn parse(s: &str) -> PfResult<Self> {
		match s {
			"pending" => Ok(WithdrawalStatus::Pending),
			"processing" => Ok(WithdrawalStatus::Processing),
			"completed" => Ok(WithdrawalStatus::Completed),
			"failed" => Ok(WithdrawalStatus::Failed),
			"cancelled" => Ok(WithdrawalStatus::Cancelled),
			_ => Err(Error::Parse),
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Cancelled
		)
	}
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
	pub withdrawal_id: i64,
	pub user_id: UserId,
	pub amount: Usd,
	pub wallet_address: Box<str>,
	pub network: Box<str>,
	pub status: WithdrawalStatus,
	pub idempotency_key: Box<str>,
	pub reserved: bool,
	pub payout_id: Option<Box<str>>,
	pub tx_hash: Option<Box<str>>,
	pub note: Option<Box<str>>,
	pub created_at: Timestamp,
	pub processed_at: Option<Timestamp>,
}

#[derive(Debug)]
pub struct CreateWithdrawalData<'a> {
	pub user_id: UserId,
	pub amount: Usd,
	pub wallet_address: &'a str,
	pub network: &'a str,
	pub idempotency_key: &'a str,
	pub created_at: Timestamp,
}

/// Guarded status transition: applied only when the current status is in
/// `from`, so concurrent sweeps and webhook retries cannot double-apply.
#[derive(Debug)]
pub struct WithdrawalTransition<'a> {
	pub from: &'a [WithdrawalStatus],
	pub to: WithdrawalStatus,
	pub payout_id: Option<&'a str>,
	pub tx_hash: Option<&'a str>,
	pub note: Option<&'a str>,
	pub processed_at: Option<Timestamp>,
}

// User / price types
// ===================

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub user_id: UserId,
	pub balance: Usd,
	pub sent_mb: f64,
	pub used_mb: f64,
	pub is_admin: bool,
	pub active: bool,
	pub created_at: Timestamp,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPrice {
	/// YYYY-MM-DD, unique
	pub date: Box<str>,
	/// Rate per gigabyte
	pub rate: Usd,
	pub message: Option<Box<str>>,
}

/// A Peerflow store adapter
///
/// Every `StoreAdapter` implementation persists the entity set of the
/// engine. Row-level uniqueness (one active session per user, one ledger
/// entry per `(reference, reason)`, one withdrawal per idempotency key)
/// must be enforced by the storage layer itself, not only by callers.
#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	// Users
	async fn read_user(&self, user_id: UserId) -> PfResult<User>;
	async fn list_user_ids(&self) -> PfResult<Vec<UserId>>;
	async fn create_user(&self, user_id: UserId, is_admin: bool) -> PfResult<User>;
	async fn set_user_active(&self, user_id: UserId, active: bool) -> PfResult<()>;
	/// Bumps the lifetime traffic counters on session close
	async fn add_lifetime_traffic(&self, user_id: UserId, sent_mb: f64, used_mb: f64)
	-> PfResult<()>;

	// Sessions
	/// Creates a session row. When `status` is `Active` and the user already
	/// has an active session, fails with
	/// `StateConflict("session_already_active")` via the storage uniqueness
	/// guarantee.
	async fn create_session(&self, data: &CreateSession<'_>) -> PfResult<Session>;
	async fn read_session(&self, session_id: &str) -> PfResult<Session>;
	async fn list_active_sessions(&self, user_id: Option<UserId>) -> PfResult<Vec<Session>>;
	async fn list_sessions(&self, user_id: UserId, limit: u32, offset: u32)
	-> PfResult<Vec<Session>>;
	/// Active sessions whose last report (or start, if none) predates `cutoff`
	async fn list_stale_active_sessions(&self, cutoff: Timestamp) -> PfResult<Vec<Session>>;
	async fn list_completed_sessions_since(&self, since: Timestamp) -> PfResult<Vec<Session>>;
	/// Terminal sessions that were closed (have an `end_time`) but never
	/// settled — a settlement that failed mid-way and must be retried
	async fn list_unsettled_closed_sessions(&self) -> PfResult<Vec<Session>>;
	/// Updates counters + earned + last_report_at; only valid while active
	async fn update_session_counters(
		&self,
		session_id: &str,
		server_mb: f64,
		client_mb: f64,
		earned: Usd,
		last_report_at: Timestamp,
	) -> PfResult<()>;
	/// Rewrites the authoritative counter and earned (reconciliation)
	async fn rewrite_session_counter(&self, session_id: &str, server_mb: f64, earned: Usd)
	-> PfResult<()>;
	async fn touch_session(&self, session_id: &str, at: Timestamp) -> PfResult<()>;
	/// Transitions `active` → `status`, setting `end_time`. Returns false if
	/// the session was not active (already closed) — callers treat that as
	/// an idempotent no-op.
	async fn close_session(
		&self,
		session_id: &str,
		status: SessionStatus,
		end_time: Timestamp,
	) -> PfResult<bool>;
	/// Sets the settled flag. Returns false if it was already set.
	async fn mark_session_settled(&self, session_id: &str) -> PfResult<bool>;

	// Reports
	/// Appends a report with the next per-session sequence number, which it
	/// returns.
	async fn append_report(&self, data: &CreateReport<'_>) -> PfResult<u32>;
	async fn list_reports(&self, s_id: i64) -> PfResult<Vec<Report>>;
	async fn sum_report_deltas(&self, s_id: i64) -> PfResult<f64>;

	// Filter audits
	async fn append_filter_audit(&self, data: &CreateFilterAudit<'_>) -> PfResult<i64>;

	// Ledger
	/// Applies `delta` to the user's balance and appends the matching ledger
	/// entry in ONE storage transaction. A concurrent insert with the same
	/// `(reference, reason)` fails with `StateConflict("duplicate_ledger_reference")`.
	async fn apply_balance_delta(
		&self,
		user_id: UserId,
		delta: Usd,
		reason: LedgerReason,
		reference: Option<&str>,
	) -> PfResult<LedgerEntry>;
	/// Rewrites the balance field from the ledger (drift correction),
	/// appending a zero-delta entry recording previous and corrected values.
	async fn rewrite_balance(
		&self,
		user_id: UserId,
		new_balance: Usd,
		reason: LedgerReason,
	) -> PfResult<LedgerEntry>;
	async fn find_ledger_entry(
		&self,
		reference: &str,
		reason: LedgerReason,
	) -> PfResult<Option<LedgerEntry>>;
	async fn list_ledger_entries(&self, user_id: UserId, limit: u32) -> PfResult<Vec<LedgerEntry>>;
	async fn sum_ledger_deltas(&self, user_id: UserId) -> PfResult<Usd>;
	/// Sum of positive deltas since `since` (income aggregates)
	async fn sum_income_since(&self, user_id: UserId, since: Timestamp) -> PfResult<Usd>;

	// Withdrawals
	/// Creates a withdrawal row. A duplicate idempotency key fails with
	/// `StateConflict("duplicate_idempotency_key")`.
	async fn create_withdrawal(&self, data: &CreateWithdrawalData<'_>) -> PfResult<Withdrawal>;
	async fn read_withdrawal(&self, withdrawal_id: i64) -> PfResult<Withdrawal>;
	async fn find_withdrawal_by_key(&self, idempotency_key: &str) -> PfResult<Option<Withdrawal>>;
	async fn find_withdrawal_by_payout(&self, payout_id: &str) -> PfResult<Option<Withdrawal>>;
	/// Applies a guarded transition; returns false when the current status
	/// was not in `from` (no-op).
	async fn transition_withdrawal(
		&self,
		withdrawal_id: i64,
		transition: &WithdrawalTransition<'_>,
	) -> PfResult<bool>;
	/// Clears the reserved flag. Returns false if it was already clear.
	async fn clear_withdrawal_reserved(&self, withdrawal_id: i64) -> PfResult<bool>;
	async fn list_withdrawals(&self, user_id: UserId, limit: u32) -> PfResult<Vec<Withdrawal>>;
	/// Non-terminal withdrawals (pending and processing), oldest first
	async fn list_unsettled_withdrawals(&self) -> PfResult<Vec<Withdrawal>>;

	// Daily prices
	/// Price row for `date`, falling back to the most recent prior row
	async fn read_price_on_or_before(&self, date: &str) -> PfResult<Option<DailyPrice>>;
	async fn upsert_price(&self, date: &str, rate: Usd, message: Option<&str>)
	-> PfResult<DailyPrice>;
}


// vim: ts=4

//! SQLite-backed implementation of the Peerflow store adapter.
//!
//! Every uniqueness rule the engine relies on (one active session per user,
//! one ledger entry per `(reference, reason)`, one withdrawal per idempotency
//! key) is enforced by a unique index, so races collapse into
//! `StateConflict` errors instead of duplicate rows.

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool, SqliteRow};
use std::path::Path;

use peerflow::{
	prelude::*,
	store_adapter::{
		CreateFilterAudit, CreateReport, CreateSession, CreateWithdrawalData, DailyPrice,
		LedgerEntry, LedgerReason, Report, Session, SessionStatus, StoreAdapter, User, Withdrawal,
		WithdrawalTransition,
	},
};

mod audit;
mod ledger;
mod price;
mod report;
mod schema;
mod session;
mod user;
mod withdrawal;

use schema::init_db;

// Helper functions
//******************
fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

pub(crate) fn db_err(err: sqlx::Error) -> Error {
	inspect(&err);
	Error::DbError
}

/// Maps a unique-index violation onto the conflict code the engine matches
/// on; everything else stays a plain database error.
pub(crate) fn unique_err(err: sqlx::Error, conflict: &'static str) -> Error {
	if err.as_database_error().is_some_and(|db| db.is_unique_violation()) {
		Error::StateConflict(conflict)
	} else {
		db_err(err)
	}
}

pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> PfResult<T>
where
	F: FnOnce(SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(row) => f(row).inspect_err(inspect).map_err(|_| Error::DbError),
		Err(sqlx::Error::RowNotFound) => Err(Error::NotFound),
		Err(err) => {
			inspect(&err);
			Err(Error::DbError)
		}
	}
}

pub(crate) fn collect_res<T>(
	iter: impl Iterator<Item = Result<T, sqlx::Error>>,
) -> PfResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.inspect_err(inspect).map_err(|_| Error::DbError)?);
	}
	Ok(items)
}

/// Lifts a domain parse failure (status strings, reason codes) into the
/// sqlx error channel so row-mapping closures stay uniform.
pub(crate) fn decode<T>(res: PfResult<T>) -> Result<T, sqlx::Error> {
	res.map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

#[derive(Debug)]
pub struct StoreAdapterSqlite {
	db: SqlitePool,
}

impl StoreAdapterSqlite {
	pub async fn new(path: impl AsRef<Path>) -> PfResult<Self> {
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.map_err(db_err)?;

		init_db(&db).await.map_err(db_err)?;

		Ok(Self { db })
	}
}

#[async_trait]
impl StoreAdapter for StoreAdapterSqlite {
	// Users
	//*******
	async fn read_user(&self, user_id: UserId) -> PfResult<User> {
		user::read(&self.db, user_id).await
	}

	async fn list_user_ids(&self) -> PfResult<Vec<UserId>> {
		user::list_ids(&self.db).await
	}

	async fn create_user(&self, user_id: UserId, is_admin: bool) -> PfResult<User> {
		user::create(&self.db, user_id, is_admin).await
	}

	async fn set_user_active(&self, user_id: UserId, active: bool) -> PfResult<()> {
		user::set_active(&self.db, user_id, active).await
	}

	async fn add_lifetime_traffic(
		&self,
		user_id: UserId,
		sent_mb: f64,
		used_mb: f64,
	) -> PfResult<()> {
		user::add_lifetime_traffic(&self.db, user_id, sent_mb, used_mb).await
	}

	// Sessions
	//**********
	async fn create_session(&self, data: &CreateSession<'_>) -> PfResult<Session> {
		session::create(&self.db, data).await
	}

	async fn read_session(&self, session_id: &str) -> PfResult<Session> {
		session::read(&self.db, session_id).await
	}

	async fn list_active_sessions(&self, user_id: Option<UserId>) -> PfResult<Vec<Session>> {
		session::list_active(&self.db, user_id).await
	}

	async fn list_sessions(
		&self,
		user_id: UserId,
		limit: u32,
		offset: u32,
	) -> PfResult<Vec<Session>> {
		session::list(&self.db, user_id, limit, offset).await
	}

	async fn list_stale_active_sessions(&self, cutoff: Timestamp) -> PfResult<Vec<Session>> {
		session::list_stale_active(&self.db, cutoff).await
	}

	async fn list_completed_sessions_since(&self, since: Timestamp) -> PfResult<Vec<Session>> {
		session::list_completed_since(&self.db, since).await
	}

	async fn list_unsettled_closed_sessions(&self) -> PfResult<Vec<Session>> {
		session::list_unsettled_closed(&self.db).await
	}

	async fn update_session_counters(
		&self,
		session_id: &str,
		server_mb: f64,
		client_mb: f64,
		earned: Usd,
		last_report_at: Timestamp,
	) -> PfResult<()> {
		session::update_counters(&self.db, session_id, server_mb, client_mb, earned, last_report_at)
			.await
	}

	async fn rewrite_session_counter(
		&self,
		session_id: &str,
		server_mb: f64,
		earned: Usd,
	) -> PfResult<()> {
		session::rewrite_counter(&self.db, session_id, server_mb, earned).await
	}

	async fn touch_session(&self, session_id: &str, at: Timestamp) -> PfResult<()> {
		session::touch(&self.db, session_id, at).await
	}

	async fn close_session(
		&self,
		session_id: &str,
		status: SessionStatus,
		end_time: Timestamp,
	) -> PfResult<bool> {
		session::close(&self.db, session_id, status, end_time).await
	}

	async fn mark_session_settled(&self, session_id: &str) -> PfResult<bool> {
		session::mark_settled(&self.db, session_id).await
	}

	// Reports
	//*********
	async fn append_report(&self, data: &CreateReport<'_>) -> PfResult<u32> {
		report::append(&self.db, data).await
	}

	async fn list_reports(&self, s_id: i64) -> PfResult<Vec<Report>> {
		report::list(&self.db, s_id).await
	}

	async fn sum_report_deltas(&self, s_id: i64) -> PfResult<f64> {
		report::sum_deltas(&self.db, s_id).await
	}

	// Filter audits
	//***************
	async fn append_filter_audit(&self, data: &CreateFilterAudit<'_>) -> PfResult<i64> {
		audit::append(&self.db, data).await
	}

	// Ledger
	//********
	async fn apply_balance_delta(
		&self,
		user_id: UserId,
		delta: Usd,
		reason: LedgerReason,
		reference: Option<&str>,
	) -> PfResult<LedgerEntry> {
		ledger::apply_delta(&self.db, user_id, delta, reason, reference).await
	}

	async fn rewrite_balance(
		&self,
		user_id: UserId,
		new_balance: Usd,
		reason: LedgerReason,
	) -> PfResult<LedgerEntry> {
		ledger::rewrite_balance(&self.db, user_id, new_balance, reason).await
	}

	async fn find_ledger_entry(
		&self,
		reference: &str,
		reason: LedgerReason,
	) -> PfResult<Option<LedgerEntry>> {
		ledger::find_entry(&self.db, reference, reason).await
	}

	async fn list_ledger_entries(
		&self,
		user_id: UserId,
		limit: u32,
	) -> PfResult<Vec<LedgerEntry>> {
		ledger::list_entries(&self.db, user_id, limit).await
	}

	async fn sum_ledger_deltas(&self, user_id: UserId) -> PfResult<Usd> {
		ledger::sum_deltas(&self.db, user_id).await
	}

	async fn sum_income_since(&self, user_id: UserId, since: Timestamp) -> PfResult<Usd> {
		ledger::sum_income_since(&self.db, user_id, since).await
	}

	// Withdrawals
	//*************
	async fn create_withdrawal(&self, data: &CreateWithdrawalData<'_>) -> PfResult<Withdrawal> {
		withdrawal::create(&self.db, data).await
	}

	async fn read_withdrawal(&self, withdrawal_id: i64) -> PfResult<Withdrawal> {
		withdrawal::read(&self.db, withdrawal_id).await
	}

	async fn find_withdrawal_by_key(&self, idempotency_key: &str) -> PfResult<Option<Withdrawal>> {
		withdrawal::find_by_key(&self.db, idempotency_key).await
	}

	async fn find_withdrawal_by_payout(&self, payout_id: &str) -> PfResult<Option<Withdrawal>> {
		withdrawal::find_by_payout(&self.db, payout_id).await
	}

	async fn transition_withdrawal(
		&self,
		withdrawal_id: i64,
		transition: &WithdrawalTransition<'_>,
	) -> PfResult<bool> {
		withdrawal::transition(&self.db, withdrawal_id, transition).await
	}

	async fn clear_withdrawal_reserved(&self, withdrawal_id: i64) -> PfResult<bool> {
		withdrawal::clear_reserved(&self.db, withdrawal_id).await
	}

	async fn list_withdrawals(&self, user_id: UserId, limit: u32) -> PfResult<Vec<Withdrawal>> {
		withdrawal::list(&self.db, user_id, limit).await
	}

	async fn list_unsettled_withdrawals(&self) -> PfResult<Vec<Withdrawal>> {
		withdrawal::list_unsettled(&self.db).await
	}

	// Daily prices
	//**************
	async fn read_price_on_or_before(&self, date: &str) -> PfResult<Option<DailyPrice>> {
		price::read_on_or_before(&self.db, date).await
	}

	async fn upsert_price(
		&self,
		date: &str,
		rate: Usd,
		message: Option<&str>,
	) -> PfResult<DailyPrice> {
		price::upsert(&self.db, date, rate, message).await
	}
}

// vim: ts=4

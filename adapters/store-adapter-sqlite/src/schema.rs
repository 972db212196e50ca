//! Database schema initialization.
//!
//! The uniqueness guarantees the engine relies on live here as indexes:
//! one active session per user, one ledger entry per (reference, reason),
//! one withdrawal per idempotency key.

use sqlx::SqlitePool;

pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Users
	//*******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS users (
		user_id integer NOT NULL,
		balance integer NOT NULL DEFAULT 0,
		sent_mb real NOT NULL DEFAULT 0,
		used_mb real NOT NULL DEFAULT 0,
		is_admin boolean NOT NULL DEFAULT false,
		active boolean NOT NULL DEFAULT true,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(user_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Sessions
	//**********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS sessions (
		s_id integer PRIMARY KEY AUTOINCREMENT,
		session_id text NOT NULL,
		user_id integer NOT NULL,
		start_time datetime NOT NULL,
		end_time datetime,
		status text NOT NULL,
		filter_status text NOT NULL,
		filter_reasons json,
		client_mb real NOT NULL DEFAULT 0,
		server_mb real NOT NULL DEFAULT 0,
		earned integer NOT NULL DEFAULT 0,
		accrual_date text NOT NULL,
		device_id text,
		client_ip text,
		network_type text,
		app_version text,
		os text,
		battery_level integer,
		last_report_at datetime,
		settled boolean NOT NULL DEFAULT false
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_session_id ON sessions(session_id)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_user ON sessions(user_id)
		WHERE status = 'active'",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_sessions_status_liveness
		ON sessions(status, last_report_at)",
	)
	.execute(&mut *tx)
	.await?;

	// Reports
	//*********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS reports (
		report_id integer PRIMARY KEY AUTOINCREMENT,
		s_id integer NOT NULL,
		sequence_number integer NOT NULL,
		delta_mb real NOT NULL,
		cumulative_mb real NOT NULL,
		speed_mbps real,
		network_type text,
		battery_level integer,
		recorded_at datetime NOT NULL
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_reports_sequence
		ON reports(s_id, sequence_number)",
	)
	.execute(&mut *tx)
	.await?;

	// Filter audits
	//***************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS filter_audits (
		audit_id integer PRIMARY KEY AUTOINCREMENT,
		user_id integer NOT NULL,
		session_id text,
		device_id text,
		client_ip text,
		country text,
		asn text,
		isp text,
		is_proxy boolean NOT NULL DEFAULT false,
		is_datacenter boolean NOT NULL DEFAULT false,
		vpn_score integer,
		network_type text,
		allowed boolean NOT NULL,
		reasons json,
		created_at datetime NOT NULL
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_filter_audits_user ON filter_audits(user_id, created_at)",
	)
	.execute(&mut *tx)
	.await?;

	// Balance history
	//*****************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS balance_history (
		entry_id integer PRIMARY KEY AUTOINCREMENT,
		user_id integer NOT NULL,
		previous_balance integer NOT NULL,
		new_balance integer NOT NULL,
		delta integer NOT NULL,
		reason text NOT NULL,
		reference text,
		created_at datetime NOT NULL
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_balance_history_reference
		ON balance_history(reference, reason) WHERE reference IS NOT NULL",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_balance_history_user
		ON balance_history(user_id, created_at)",
	)
	.execute(&mut *tx)
	.await?;

	// Withdraw requests
	//*******************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS withdraw_requests (
		withdrawal_id integer PRIMARY KEY AUTOINCREMENT,
		user_id integer NOT NULL,
		amount integer NOT NULL,
		wallet_address text NOT NULL,
		network text NOT NULL,
		status text NOT NULL DEFAULT 'pending',
		idempotency_key text NOT NULL,
		reserved boolean NOT NULL DEFAULT true,
		payout_id text,
		tx_hash text,
		note text,
		created_at datetime NOT NULL,
		processed_at datetime
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_withdraw_requests_key
		ON withdraw_requests(idempotency_key)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_withdraw_requests_payout
		ON withdraw_requests(payout_id) WHERE payout_id IS NOT NULL",
	)
	.execute(&mut *tx)
	.await?;

	// Daily prices
	//**************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS daily_prices (
		date text NOT NULL,
		rate integer NOT NULL,
		message text,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(date)
	)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4

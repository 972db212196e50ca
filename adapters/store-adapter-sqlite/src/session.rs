use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use peerflow::{
	prelude::*,
	store_adapter::{CreateSession, FilterStatus, Session, SessionStatus},
};

use crate::{collect_res, db_err, decode, inspect, map_res, unique_err};

const SESSION_COLUMNS: &str = "s_id, session_id, user_id, start_time, end_time, status,
	filter_status, filter_reasons, client_mb, server_mb, earned, accrual_date, device_id,
	client_ip, network_type, app_version, os, battery_level, last_report_at, settled";

pub(crate) fn session_from_row(row: &SqliteRow) -> Result<Session, sqlx::Error> {
	let reasons: Option<String> = row.try_get("filter_reasons")?;
	let filter_reasons = match reasons {
		Some(json) => decode(
			serde_json::from_str::<Vec<Box<str>>>(&json).map_err(|_| Error::Parse),
		)?
		.into_boxed_slice(),
		None => Box::default(),
	};
	let status: String = row.try_get("status")?;
	let filter_status: String = row.try_get("filter_status")?;
	Ok(Session {
		s_id: row.try_get("s_id")?,
		session_id: row.try_get::<String, _>("session_id")?.into(),
		user_id: UserId(row.try_get("user_id")?),
		start_time: Timestamp(row.try_get("start_time")?),
		end_time: row.try_get::<Option<i64>, _>("end_time")?.map(Timestamp),
		status: decode(SessionStatus::parse(&status))?,
		filter_status: decode(FilterStatus::parse(&filter_status))?,
		filter_reasons,
		client_mb: row.try_get("client_mb")?,
		server_mb: row.try_get("server_mb")?,
		earned: Usd::from_micros(row.try_get("earned")?),
		accrual_date: row.try_get::<String, _>("accrual_date")?.into(),
		device_id: row.try_get::<Option<String>, _>("device_id")?.map(Into::into),
		client_ip: row.try_get::<Option<String>, _>("client_ip")?.map(Into::into),
		network_type: row.try_get::<Option<String>, _>("network_type")?.map(Into::into),
		app_version: row.try_get::<Option<String>, _>("app_version")?.map(Into::into),
		os: row.try_get::<Option<String>, _>("os")?.map(Into::into),
		battery_level: row.try_get("battery_level")?,
		last_report_at: row.try_get::<Option<i64>, _>("last_report_at")?.map(Timestamp),
		settled: row.try_get("settled")?,
	})
}

pub(crate) async fn create(db: &SqlitePool, data: &CreateSession<'_>) -> PfResult<Session> {
	let reasons = if data.filter_reasons.is_empty() {
		None
	} else {
		Some(serde_json::to_string(data.filter_reasons).map_err(|_| Error::Parse)?)
	};
	let row = sqlx::query(&format!(
		"INSERT INTO sessions (session_id, user_id, start_time, status, filter_status,
		filter_reasons, accrual_date, device_id, client_ip, network_type, app_version, os,
		battery_level)
		VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
		RETURNING {SESSION_COLUMNS}"
	))
	.bind(data.session_id)
	.bind(data.user_id.0)
	.bind(data.start_time.0)
	.bind(data.status.as_str())
	.bind(data.filter_status.as_str())
	.bind(reasons)
	.bind(data.accrual_date)
	.bind(data.device_id)
	.bind(data.client_ip)
	.bind(data.network_type)
	.bind(data.app_version)
	.bind(data.os)
	.bind(data.battery_level)
	.fetch_one(db)
	.await
	.map_err(|err| unique_err(err, "session_already_active"))?;
	session_from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)
}

pub(crate) async fn read(db: &SqlitePool, session_id: &str) -> PfResult<Session> {
	let row = sqlx::query(&format!(
		"SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"
	))
	.bind(session_id)
	.fetch_one(db)
	.await;
	map_res(row, |row| session_from_row(&row))
}

pub(crate) async fn list_active(
	db: &SqlitePool,
	user_id: Option<UserId>,
) -> PfResult<Vec<Session>> {
	let res = match user_id {
		Some(user_id) => {
			sqlx::query(&format!(
				"SELECT {SESSION_COLUMNS} FROM sessions
				WHERE status = 'active' AND user_id = ?1 ORDER BY start_time"
			))
			.bind(user_id.0)
			.fetch_all(db)
			.await
		}
		None => {
			sqlx::query(&format!(
				"SELECT {SESSION_COLUMNS} FROM sessions WHERE status = 'active' ORDER BY start_time"
			))
			.fetch_all(db)
			.await
		}
	}
	.map_err(db_err)?;
	collect_res(res.iter().map(session_from_row))
}

pub(crate) async fn list(
	db: &SqlitePool,
	user_id: UserId,
	limit: u32,
	offset: u32,
) -> PfResult<Vec<Session>> {
	let res = sqlx::query(&format!(
		"SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1
		ORDER BY start_time DESC LIMIT ?2 OFFSET ?3"
	))
	.bind(user_id.0)
	.bind(limit)
	.bind(offset)
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(session_from_row))
}

pub(crate) async fn list_stale_active(
	db: &SqlitePool,
	cutoff: Timestamp,
) -> PfResult<Vec<Session>> {
	let res = sqlx::query(&format!(
		"SELECT {SESSION_COLUMNS} FROM sessions
		WHERE status = 'active' AND coalesce(last_report_at, start_time) < ?1"
	))
	.bind(cutoff.0)
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(session_from_row))
}

pub(crate) async fn list_completed_since(
	db: &SqlitePool,
	since: Timestamp,
) -> PfResult<Vec<Session>> {
	let res = sqlx::query(&format!(
		"SELECT {SESSION_COLUMNS} FROM sessions
		WHERE status = 'completed' AND end_time >= ?1 ORDER BY end_time"
	))
	.bind(since.0)
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(session_from_row))
}

// Denied analytics rows are terminal too, but carry no end_time and never
// enter the settlement pipeline.
pub(crate) async fn list_unsettled_closed(db: &SqlitePool) -> PfResult<Vec<Session>> {
	let res = sqlx::query(&format!(
		"SELECT {SESSION_COLUMNS} FROM sessions
		WHERE status IN ('completed', 'failed', 'cancelled') AND settled = false
		AND end_time IS NOT NULL ORDER BY end_time"
	))
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(session_from_row))
}

pub(crate) async fn update_counters(
	db: &SqlitePool,
	session_id: &str,
	server_mb: f64,
	client_mb: f64,
	earned: Usd,
	last_report_at: Timestamp,
) -> PfResult<()> {
	let res = sqlx::query(
		"UPDATE sessions SET server_mb = ?1, client_mb = ?2, earned = ?3, last_report_at = ?4
		WHERE session_id = ?5 AND status = 'active'",
	)
	.bind(server_mb)
	.bind(client_mb)
	.bind(earned.micros())
	.bind(last_report_at.0)
	.bind(session_id)
	.execute(db)
	.await
	.map_err(db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::StateConflict("session_not_active"));
	}
	Ok(())
}

pub(crate) async fn rewrite_counter(
	db: &SqlitePool,
	session_id: &str,
	server_mb: f64,
	earned: Usd,
) -> PfResult<()> {
	let res = sqlx::query(
		"UPDATE sessions SET server_mb = ?1, earned = ?2 WHERE session_id = ?3",
	)
	.bind(server_mb)
	.bind(earned.micros())
	.bind(session_id)
	.execute(db)
	.await
	.map_err(db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn touch(db: &SqlitePool, session_id: &str, at: Timestamp) -> PfResult<()> {
	let res = sqlx::query(
		"UPDATE sessions SET last_report_at = ?1 WHERE session_id = ?2 AND status = 'active'",
	)
	.bind(at.0)
	.bind(session_id)
	.execute(db)
	.await
	.map_err(db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::StateConflict("session_not_active"));
	}
	Ok(())
}

pub(crate) async fn close(
	db: &SqlitePool,
	session_id: &str,
	status: SessionStatus,
	end_time: Timestamp,
) -> PfResult<bool> {
	let res = sqlx::query(
		"UPDATE sessions SET status = ?1, end_time = ?2
		WHERE session_id = ?3 AND status = 'active'",
	)
	.bind(status.as_str())
	.bind(end_time.0)
	.bind(session_id)
	.execute(db)
	.await
	.map_err(db_err)?;
	Ok(res.rows_affected() > 0)
}

pub(crate) async fn mark_settled(db: &SqlitePool, session_id: &str) -> PfResult<bool> {
	let res = sqlx::query(
		"UPDATE sessions SET settled = true WHERE session_id = ?1 AND settled = false",
	)
	.bind(session_id)
	.execute(db)
	.await
	.map_err(db_err)?;
	Ok(res.rows_affected() > 0)
}

// vim: ts=4

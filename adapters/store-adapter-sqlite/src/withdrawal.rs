use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, SqlitePool};

use peerflow::{
	prelude::*,
	store_adapter::{CreateWithdrawalData, Withdrawal, WithdrawalStatus, WithdrawalTransition},
};

use crate::{collect_res, db_err, decode, inspect, map_res, unique_err};

const WITHDRAWAL_COLUMNS: &str = "withdrawal_id, user_id, amount, wallet_address, network,
	status, idempotency_key, reserved, payout_id, tx_hash, note, created_at, processed_at";

fn withdrawal_from_row(row: &SqliteRow) -> Result<Withdrawal, sqlx::Error> {
	let status: String = row.try_get("status")?;
	Ok(Withdrawal {
		withdrawal_id: row.try_get("withdrawal_id")?,
		user_id: UserId(row.try_get("user_id")?),
		amount: Usd::from_micros(row.try_get("amount")?),
		wallet_address: row.try_get::<String, _>("wallet_address")?.into(),
		network: row.try_get::<String, _>("network")?.into(),
		status: decode(WithdrawalStatus::parse(&status))?,
		idempotency_key: row.try_get::<String, _>("idempotency_key")?.into(),
		reserved: row.try_get("reserved")?,
		payout_id: row.try_get::<Option<String>, _>("payout_id")?.map(Into::into),
		tx_hash: row.try_get::<Option<String>, _>("tx_hash")?.map(Into::into),
		note: row.try_get::<Option<String>, _>("note")?.map(Into::into),
		created_at: Timestamp(row.try_get("created_at")?),
		processed_at: row.try_get::<Option<i64>, _>("processed_at")?.map(Timestamp),
	})
}

pub(crate) async fn create(
	db: &SqlitePool,
	data: &CreateWithdrawalData<'_>,
) -> PfResult<Withdrawal> {
	let row = sqlx::query(&format!(
		"INSERT INTO withdraw_requests (user_id, amount, wallet_address, network,
		idempotency_key, created_at)
		VALUES (?1, ?2, ?3, ?4, ?5, ?6)
		RETURNING {WITHDRAWAL_COLUMNS}"
	))
	.bind(data.user_id.0)
	.bind(data.amount.micros())
	.bind(data.wallet_address)
	.bind(data.network)
	.bind(data.idempotency_key)
	.bind(data.created_at.0)
	.fetch_one(db)
	.await
	.map_err(|err| unique_err(err, "duplicate_idempotency_key"))?;
	withdrawal_from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)
}

pub(crate) async fn read(db: &SqlitePool, withdrawal_id: i64) -> PfResult<Withdrawal> {
	let row = sqlx::query(&format!(
		"SELECT {WITHDRAWAL_COLUMNS} FROM withdraw_requests WHERE withdrawal_id = ?1"
	))
	.bind(withdrawal_id)
	.fetch_one(db)
	.await;
	map_res(row, |row| withdrawal_from_row(&row))
}

pub(crate) async fn find_by_key(
	db: &SqlitePool,
	idempotency_key: &str,
) -> PfResult<Option<Withdrawal>> {
	find_one(db, "idempotency_key", idempotency_key).await
}

pub(crate) async fn find_by_payout(
	db: &SqlitePool,
	payout_id: &str,
) -> PfResult<Option<Withdrawal>> {
	find_one(db, "payout_id", payout_id).await
}

async fn find_one(db: &SqlitePool, column: &str, value: &str) -> PfResult<Option<Withdrawal>> {
	let row = sqlx::query(&format!(
		"SELECT {WITHDRAWAL_COLUMNS} FROM withdraw_requests WHERE {column} = ?1"
	))
	.bind(value)
	.fetch_optional(db)
	.await
	.map_err(db_err)?;
	match row {
		Some(row) => Ok(Some(
			withdrawal_from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)?,
		)),
		None => Ok(None),
	}
}

/// The `from` guard is part of the WHERE clause, so a transition that lost
/// the race simply affects zero rows.
pub(crate) async fn transition(
	db: &SqlitePool,
	withdrawal_id: i64,
	transition: &WithdrawalTransition<'_>,
) -> PfResult<bool> {
	let mut query = QueryBuilder::new("UPDATE withdraw_requests SET status = ");
	query.push_bind(transition.to.as_str());
	if let Some(payout_id) = transition.payout_id {
		query.push(", payout_id = ");
		query.push_bind(payout_id);
	}
	if let Some(tx_hash) = transition.tx_hash {
		query.push(", tx_hash = ");
		query.push_bind(tx_hash);
	}
	if let Some(note) = transition.note {
		query.push(", note = ");
		query.push_bind(note);
	}
	if let Some(processed_at) = transition.processed_at {
		query.push(", processed_at = ");
		query.push_bind(processed_at.0);
	}
	query.push(" WHERE withdrawal_id = ");
	query.push_bind(withdrawal_id);
	query.push(" AND status IN (");
	for (i, status) in transition.from.iter().enumerate() {
		if i > 0 {
			query.push(", ");
		}
		query.push_bind(status.as_str());
	}
	query.push(")");

	let res = query.build().execute(db).await.map_err(db_err)?;
	Ok(res.rows_affected() > 0)
}

pub(crate) async fn clear_reserved(db: &SqlitePool, withdrawal_id: i64) -> PfResult<bool> {
	let res = sqlx::query(
		"UPDATE withdraw_requests SET reserved = false
		WHERE withdrawal_id = ?1 AND reserved = true",
	)
	.bind(withdrawal_id)
	.execute(db)
	.await
	.map_err(db_err)?;
	Ok(res.rows_affected() > 0)
}

pub(crate) async fn list(
	db: &SqlitePool,
	user_id: UserId,
	limit: u32,
) -> PfResult<Vec<Withdrawal>> {
	let res = sqlx::query(&format!(
		"SELECT {WITHDRAWAL_COLUMNS} FROM withdraw_requests WHERE user_id = ?1
		ORDER BY withdrawal_id DESC LIMIT ?2"
	))
	.bind(user_id.0)
	.bind(limit)
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(withdrawal_from_row))
}

pub(crate) async fn list_unsettled(db: &SqlitePool) -> PfResult<Vec<Withdrawal>> {
	let res = sqlx::query(&format!(
		"SELECT {WITHDRAWAL_COLUMNS} FROM withdraw_requests
		WHERE status IN ('pending', 'processing') ORDER BY withdrawal_id"
	))
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(withdrawal_from_row))
}

// vim: ts=4

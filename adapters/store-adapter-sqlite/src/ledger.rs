use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use peerflow::{
	prelude::*,
	store_adapter::{LedgerEntry, LedgerReason},
};

use crate::{collect_res, db_err, decode, inspect, map_res, unique_err};

const ENTRY_COLUMNS: &str =
	"entry_id, user_id, previous_balance, new_balance, delta, reason, reference, created_at";

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry, sqlx::Error> {
	let reason: String = row.try_get("reason")?;
	Ok(LedgerEntry {
		entry_id: row.try_get("entry_id")?,
		user_id: UserId(row.try_get("user_id")?),
		previous_balance: Usd::from_micros(row.try_get("previous_balance")?),
		new_balance: Usd::from_micros(row.try_get("new_balance")?),
		delta: Usd::from_micros(row.try_get("delta")?),
		reason: decode(LedgerReason::parse(&reason))?,
		reference: row.try_get::<Option<String>, _>("reference")?.map(Into::into),
		created_at: Timestamp(row.try_get("created_at")?),
	})
}

/// Balance mutation and its ledger entry in one transaction. Either both
/// land or neither does; the partial unique index on `(reference, reason)`
/// turns a concurrent duplicate into `StateConflict`.
pub(crate) async fn apply_delta(
	db: &SqlitePool,
	user_id: UserId,
	delta: Usd,
	reason: LedgerReason,
	reference: Option<&str>,
) -> PfResult<LedgerEntry> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let row = sqlx::query("SELECT balance FROM users WHERE user_id = ?1")
		.bind(user_id.0)
		.fetch_one(&mut *tx)
		.await;
	let previous = Usd::from_micros(map_res(row, |row| row.try_get::<i64, _>("balance"))?);
	let new_balance = previous + delta;

	sqlx::query("UPDATE users SET balance = ?1 WHERE user_id = ?2")
		.bind(new_balance.micros())
		.bind(user_id.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;

	let created_at = now();
	let row = sqlx::query(
		"INSERT INTO balance_history (user_id, previous_balance, new_balance, delta, reason,
		reference, created_at)
		VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
		RETURNING entry_id",
	)
	.bind(user_id.0)
	.bind(previous.micros())
	.bind(new_balance.micros())
	.bind(delta.micros())
	.bind(reason.as_str())
	.bind(reference)
	.bind(created_at.0)
	.fetch_one(&mut *tx)
	.await
	.map_err(|err| unique_err(err, "duplicate_ledger_reference"))?;
	let entry_id: i64 =
		row.try_get("entry_id").inspect_err(inspect).map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(db_err)?;

	Ok(LedgerEntry {
		entry_id,
		user_id,
		previous_balance: previous,
		new_balance,
		delta,
		reason,
		reference: reference.map(Into::into),
		created_at,
	})
}

/// Drift correction: forces the balance field to `new_balance` and records
/// the jump as a zero-delta entry so the ledger sum invariant survives.
pub(crate) async fn rewrite_balance(
	db: &SqlitePool,
	user_id: UserId,
	new_balance: Usd,
	reason: LedgerReason,
) -> PfResult<LedgerEntry> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let row = sqlx::query("SELECT balance FROM users WHERE user_id = ?1")
		.bind(user_id.0)
		.fetch_one(&mut *tx)
		.await;
	let previous = Usd::from_micros(map_res(row, |row| row.try_get::<i64, _>("balance"))?);

	sqlx::query("UPDATE users SET balance = ?1 WHERE user_id = ?2")
		.bind(new_balance.micros())
		.bind(user_id.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;

	let created_at = now();
	let row = sqlx::query(
		"INSERT INTO balance_history (user_id, previous_balance, new_balance, delta, reason,
		reference, created_at)
		VALUES (?1, ?2, ?3, 0, ?4, NULL, ?5)
		RETURNING entry_id",
	)
	.bind(user_id.0)
	.bind(previous.micros())
	.bind(new_balance.micros())
	.bind(reason.as_str())
	.bind(created_at.0)
	.fetch_one(&mut *tx)
	.await
	.map_err(db_err)?;
	let entry_id: i64 =
		row.try_get("entry_id").inspect_err(inspect).map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(db_err)?;

	Ok(LedgerEntry {
		entry_id,
		user_id,
		previous_balance: previous,
		new_balance,
		delta: Usd::ZERO,
		reason,
		reference: None,
		created_at,
	})
}

pub(crate) async fn find_entry(
	db: &SqlitePool,
	reference: &str,
	reason: LedgerReason,
) -> PfResult<Option<LedgerEntry>> {
	let row = sqlx::query(&format!(
		"SELECT {ENTRY_COLUMNS} FROM balance_history WHERE reference = ?1 AND reason = ?2"
	))
	.bind(reference)
	.bind(reason.as_str())
	.fetch_optional(db)
	.await
	.map_err(db_err)?;
	match row {
		Some(row) => {
			Ok(Some(entry_from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)?))
		}
		None => Ok(None),
	}
}

pub(crate) async fn list_entries(
	db: &SqlitePool,
	user_id: UserId,
	limit: u32,
) -> PfResult<Vec<LedgerEntry>> {
	let res = sqlx::query(&format!(
		"SELECT {ENTRY_COLUMNS} FROM balance_history WHERE user_id = ?1
		ORDER BY entry_id DESC LIMIT ?2"
	))
	.bind(user_id.0)
	.bind(limit)
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(entry_from_row))
}

pub(crate) async fn sum_deltas(db: &SqlitePool, user_id: UserId) -> PfResult<Usd> {
	let row = sqlx::query(
		"SELECT coalesce(sum(delta), 0) AS total FROM balance_history WHERE user_id = ?1",
	)
	.bind(user_id.0)
	.fetch_one(db)
	.await;
	Ok(Usd::from_micros(map_res(row, |row| row.try_get::<i64, _>("total"))?))
}

pub(crate) async fn sum_income_since(
	db: &SqlitePool,
	user_id: UserId,
	since: Timestamp,
) -> PfResult<Usd> {
	let row = sqlx::query(
		"SELECT coalesce(sum(delta), 0) AS total FROM balance_history
		WHERE user_id = ?1 AND delta > 0 AND created_at >= ?2",
	)
	.bind(user_id.0)
	.bind(since.0)
	.fetch_one(db)
	.await;
	Ok(Usd::from_micros(map_res(row, |row| row.try_get::<i64, _>("total"))?))
}

// vim: ts=4

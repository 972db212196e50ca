use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use peerflow::{prelude::*, store_adapter::User};

use crate::{collect_res, db_err, inspect, map_res, unique_err};

fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
	Ok(User {
		user_id: UserId(row.try_get("user_id")?),
		balance: Usd::from_micros(row.try_get("balance")?),
		sent_mb: row.try_get("sent_mb")?,
		used_mb: row.try_get("used_mb")?,
		is_admin: row.try_get("is_admin")?,
		active: row.try_get("active")?,
		created_at: Timestamp(row.try_get("created_at")?),
	})
}

pub(crate) async fn read(db: &SqlitePool, user_id: UserId) -> PfResult<User> {
	let row = sqlx::query(
		"SELECT user_id, balance, sent_mb, used_mb, is_admin, active, created_at
		FROM users WHERE user_id = ?1",
	)
	.bind(user_id.0)
	.fetch_one(db)
	.await;
	map_res(row, |row| user_from_row(&row))
}

pub(crate) async fn list_ids(db: &SqlitePool) -> PfResult<Vec<UserId>> {
	let res = sqlx::query("SELECT user_id FROM users ORDER BY user_id")
		.fetch_all(db)
		.await
		.map_err(db_err)?;
	collect_res(res.iter().map(|row| Ok(UserId(row.try_get("user_id")?))))
}

pub(crate) async fn create(db: &SqlitePool, user_id: UserId, is_admin: bool) -> PfResult<User> {
	let row = sqlx::query(
		"INSERT INTO users (user_id, is_admin) VALUES (?1, ?2)
		RETURNING user_id, balance, sent_mb, used_mb, is_admin, active, created_at",
	)
	.bind(user_id.0)
	.bind(is_admin)
	.fetch_one(db)
	.await
	.map_err(|err| unique_err(err, "user_already_exists"))?;
	user_from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)
}

pub(crate) async fn set_active(db: &SqlitePool, user_id: UserId, active: bool) -> PfResult<()> {
	let res = sqlx::query("UPDATE users SET active = ?1 WHERE user_id = ?2")
		.bind(active)
		.bind(user_id.0)
		.execute(db)
		.await
		.map_err(db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn add_lifetime_traffic(
	db: &SqlitePool,
	user_id: UserId,
	sent_mb: f64,
	used_mb: f64,
) -> PfResult<()> {
	let res = sqlx::query(
		"UPDATE users SET sent_mb = sent_mb + ?1, used_mb = used_mb + ?2 WHERE user_id = ?3",
	)
	.bind(sent_mb)
	.bind(used_mb)
	.bind(user_id.0)
	.execute(db)
	.await
	.map_err(db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

// vim: ts=4

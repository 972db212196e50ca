use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use peerflow::{prelude::*, store_adapter::DailyPrice};

use crate::{db_err, inspect};

fn price_from_row(row: &SqliteRow) -> Result<DailyPrice, sqlx::Error> {
	Ok(DailyPrice {
		date: row.try_get::<String, _>("date")?.into(),
		rate: Usd::from_micros(row.try_get("rate")?),
		message: row.try_get::<Option<String>, _>("message")?.map(Into::into),
	})
}

pub(crate) async fn read_on_or_before(
	db: &SqlitePool,
	date: &str,
) -> PfResult<Option<DailyPrice>> {
	let row = sqlx::query(
		"SELECT date, rate, message FROM daily_prices WHERE date <= ?1
		ORDER BY date DESC LIMIT 1",
	)
	.bind(date)
	.fetch_optional(db)
	.await
	.map_err(db_err)?;
	match row {
		Some(row) => {
			Ok(Some(price_from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)?))
		}
		None => Ok(None),
	}
}

pub(crate) async fn upsert(
	db: &SqlitePool,
	date: &str,
	rate: Usd,
	message: Option<&str>,
) -> PfResult<DailyPrice> {
	let row = sqlx::query(
		"INSERT INTO daily_prices (date, rate, message) VALUES (?1, ?2, ?3)
		ON CONFLICT(date) DO UPDATE SET rate = excluded.rate, message = excluded.message
		RETURNING date, rate, message",
	)
	.bind(date)
	.bind(rate.micros())
	.bind(message)
	.fetch_one(db)
	.await
	.map_err(db_err)?;
	price_from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)
}

// vim: ts=4

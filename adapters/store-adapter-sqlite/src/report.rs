use sqlx::{Row, SqlitePool};

use peerflow::{
	prelude::*,
	store_adapter::{CreateReport, Report},
};

use crate::{collect_res, db_err, map_res};

/// The per-session sequence number is assigned inside the insert so two
/// concurrent reports can never claim the same slot.
pub(crate) async fn append(db: &SqlitePool, data: &CreateReport<'_>) -> PfResult<u32> {
	let row = sqlx::query(
		"INSERT INTO reports (s_id, sequence_number, delta_mb, cumulative_mb, speed_mbps,
		network_type, battery_level, recorded_at)
		VALUES (?1,
			(SELECT coalesce(max(sequence_number), 0) + 1 FROM reports WHERE s_id = ?1),
			?2, ?3, ?4, ?5, ?6, ?7)
		RETURNING sequence_number",
	)
	.bind(data.s_id)
	.bind(data.delta_mb)
	.bind(data.cumulative_mb)
	.bind(data.speed_mbps)
	.bind(data.network_type)
	.bind(data.battery_level)
	.bind(data.recorded_at.0)
	.fetch_one(db)
	.await;
	map_res(row, |row| row.try_get::<u32, _>("sequence_number"))
}

pub(crate) async fn list(db: &SqlitePool, s_id: i64) -> PfResult<Vec<Report>> {
	let res = sqlx::query(
		"SELECT report_id, s_id, sequence_number, delta_mb, cumulative_mb, speed_mbps,
		network_type, battery_level, recorded_at
		FROM reports WHERE s_id = ?1 ORDER BY sequence_number",
	)
	.bind(s_id)
	.fetch_all(db)
	.await
	.map_err(db_err)?;
	collect_res(res.iter().map(|row| {
		Ok(Report {
			report_id: row.try_get("report_id")?,
			s_id: row.try_get("s_id")?,
			sequence_number: row.try_get("sequence_number")?,
			delta_mb: row.try_get("delta_mb")?,
			cumulative_mb: row.try_get("cumulative_mb")?,
			speed_mbps: row.try_get("speed_mbps")?,
			network_type: row.try_get::<Option<String>, _>("network_type")?.map(Into::into),
			battery_level: row.try_get("battery_level")?,
			recorded_at: Timestamp(row.try_get("recorded_at")?),
		})
	}))
}

pub(crate) async fn sum_deltas(db: &SqlitePool, s_id: i64) -> PfResult<f64> {
	let row = sqlx::query("SELECT coalesce(sum(delta_mb), 0.0) AS total FROM reports WHERE s_id = ?1")
		.bind(s_id)
		.fetch_one(db)
		.await;
	map_res(row, |row| row.try_get::<f64, _>("total"))
}

// vim: ts=4

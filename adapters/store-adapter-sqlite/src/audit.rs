use sqlx::{Row, SqlitePool};

use peerflow::{prelude::*, store_adapter::CreateFilterAudit};

use crate::map_res;

/// Append-only; there is deliberately no update or delete counterpart.
pub(crate) async fn append(db: &SqlitePool, data: &CreateFilterAudit<'_>) -> PfResult<i64> {
	let reasons = if data.reasons.is_empty() {
		None
	} else {
		Some(serde_json::to_string(data.reasons).map_err(|_| Error::Parse)?)
	};
	let row = sqlx::query(
		"INSERT INTO filter_audits (user_id, session_id, device_id, client_ip, country, asn,
		isp, is_proxy, is_datacenter, vpn_score, network_type, allowed, reasons, created_at)
		VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
		RETURNING audit_id",
	)
	.bind(data.user_id.0)
	.bind(data.session_id)
	.bind(data.device_id)
	.bind(data.client_ip)
	.bind(data.country)
	.bind(data.asn)
	.bind(data.isp)
	.bind(data.is_proxy)
	.bind(data.is_datacenter)
	.bind(data.vpn_score)
	.bind(data.network_type)
	.bind(data.allowed)
	.bind(reasons)
	.bind(data.created_at.0)
	.fetch_one(db)
	.await;
	map_res(row, |row| row.try_get::<i64, _>("audit_id"))
}

// vim: ts=4

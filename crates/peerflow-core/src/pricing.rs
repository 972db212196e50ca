//! Daily price resolution.
//!
//! Earnings are priced per gigabyte from a calendar of daily price rows.
//! A session is priced on its accrual date: the exact date's row wins,
//! otherwise the most recent prior row, otherwise a static fallback rate.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime};
use std::sync::Arc;

use peerflow_types::prelude::*;
use peerflow_types::store_adapter::{DailyPrice, StoreAdapter};

use crate::settings::PricingSettings;

pub const DATE_FMT: &str = "%Y-%m-%d";

/// UTC calendar date of a timestamp, `YYYY-MM-DD`.
pub fn date_of(ts: Timestamp) -> Box<str> {
	let dt = DateTime::from_timestamp(ts.0, 0).unwrap_or_default();
	dt.format(DATE_FMT).to_string().into()
}

/// UTC midnight of the day containing `ts`.
pub fn day_start(ts: Timestamp) -> Timestamp {
	let dt = DateTime::from_timestamp(ts.0, 0).unwrap_or_default();
	Timestamp(dt.date_naive().and_time(NaiveTime::MIN).and_utc().timestamp())
}

/// UTC midnight of the first day of the month containing `ts`.
pub fn month_start(ts: Timestamp) -> Timestamp {
	let dt = DateTime::from_timestamp(ts.0, 0).unwrap_or_default();
	let first = dt.date_naive().with_day0(0).unwrap_or(dt.date_naive());
	Timestamp(first.and_time(NaiveTime::MIN).and_utc().timestamp())
}

#[derive(Debug)]
pub struct PricingOracle {
	store: Arc<dyn StoreAdapter>,
	settings: PricingSettings,
}

impl PricingOracle {
	pub fn new(store: Arc<dyn StoreAdapter>, settings: PricingSettings) -> Self {
		PricingOracle { store, settings }
	}

	/// Effective per-gigabyte rate for a calendar date.
	pub async fn rate_for(&self, date: &str) -> PfResult<Usd> {
		match self.store.read_price_on_or_before(date).await? {
			Some(price) => Ok(price.rate),
			None => Ok(self.settings.fallback_rate_per_gb),
		}
	}

	/// Sets (or overwrites) the rate for one date. Operator-only at the API
	/// boundary.
	pub async fn set_rate(
		&self,
		date: &str,
		rate: Usd,
		message: Option<&str>,
	) -> PfResult<DailyPrice> {
		if NaiveDate::parse_from_str(date, DATE_FMT).is_err() {
			return Err(Error::Validation(format!("invalid price date '{date}'")));
		}
		if !rate.is_positive() {
			return Err(Error::Validation("price rate must be positive".into()));
		}
		let price = self.store.upsert_price(date, rate, message).await?;
		info!("price for {} set to {}/GB", price.date, price.rate);
		Ok(price)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn date_helpers() {
		// 2024-05-15T13:45:00Z
		let ts = Timestamp(1_715_780_700);
		assert_eq!(&*date_of(ts), "2024-05-15");
		assert_eq!(&*date_of(day_start(ts)), "2024-05-15");
		assert_eq!(day_start(ts).0 % 86_400, 0);
		assert_eq!(&*date_of(month_start(ts)), "2024-05-01");
	}
}

// vim: ts=4

//! Common types used throughout the Peerflow engine.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

// UserId //
//********//
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for UserId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for UserId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(UserId(i64::deserialize(deserializer)?))
	}
}

// Timestamp //
//***********//
/// Unix timestamp in seconds.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Timestamp(pub i64);

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

pub fn now() -> Timestamp {
	let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
	Timestamp(res.as_secs() as i64)
}

// Usd //
//*****//
/// Fixed-point currency amount in micro-dollars (1 USD = 1_000_000).
///
/// The original balances were stored as `Numeric(18, 6)`; an i64 micro
/// representation keeps ledger sums exact under arbitrary interleavings.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Usd(i64);

impl Usd {
	pub const ZERO: Usd = Usd(0);
	pub const MICROS: i64 = 1_000_000;

	pub const fn from_micros(micros: i64) -> Self {
		Usd(micros)
	}

	pub const fn from_cents(cents: i64) -> Self {
		Usd(cents * 10_000)
	}

	pub const fn from_dollars(dollars: i64) -> Self {
		Usd(dollars * Self::MICROS)
	}

	pub const fn micros(self) -> i64 {
		self.0
	}

	pub const fn is_negative(self) -> bool {
		self.0 < 0
	}

	pub const fn is_positive(self) -> bool {
		self.0 > 0
	}

	pub const fn abs(self) -> Self {
		Usd(self.0.abs())
	}

	pub fn checked_add(self, other: Usd) -> Option<Usd> {
		self.0.checked_add(other.0).map(Usd)
	}

	/// Price `mb` megabytes at `rate_per_gb`, rounding to the nearest micro.
	pub fn price_mb(mb: f64, rate_per_gb: Usd) -> Usd {
		Usd(((mb / 1024.0) * rate_per_gb.0 as f64).round() as i64)
	}
}

impl std::ops::Add for Usd {
	type Output = Usd;
	fn add(self, other: Usd) -> Usd {
		Usd(self.0 + other.0)
	}
}

impl std::ops::Sub for Usd {
	type Output = Usd;
	fn sub(self, other: Usd) -> Usd {
		Usd(self.0 - other.0)
	}
}

impl std::ops::Neg for Usd {
	type Output = Usd;
	fn neg(self) -> Usd {
		Usd(-self.0)
	}
}

impl std::fmt::Display for Usd {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let sign = if self.0 < 0 { "-" } else { "" };
		let abs = self.0.unsigned_abs();
		write!(f, "{}${}.{:06}", sign, abs / Self::MICROS as u64, abs % Self::MICROS as u64)
	}
}

impl Serialize for Usd {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Usd {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(Usd(i64::deserialize(deserializer)?))
	}
}


// vim: ts=4

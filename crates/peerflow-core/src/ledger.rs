//! Balance ledger: the single writer of user balances.
//!
//! Every balance mutation goes through here, serialized per user, and
//! leaves an append-only `LedgerEntry` behind. Mutations carrying a
//! reference are idempotent: a replay with the same `(reference, reason)`
//! returns the original entry instead of applying twice. The standing
//! invariant is `balance == sum of ledger deltas`; `reconcile_user`
//! restores it when storage-level interference breaks it.

use std::sync::Arc;

use peerflow_types::prelude::*;
use peerflow_types::store_adapter::{LedgerEntry, LedgerReason, StoreAdapter};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::keyed_lock::KeyedLock;
use crate::pricing;

/// Snapshot returned by the balance overview operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceOverview {
	pub balance: Usd,
	pub today_income: Usd,
	pub month_income: Usd,
	pub recent_entries: Vec<LedgerEntry>,
}

/// Outcome of one balance drift check.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAudit {
	pub balance: Usd,
	pub ledger_sum: Usd,
	pub corrected: bool,
}

#[derive(Debug)]
pub struct BalanceLedger {
	store: Arc<dyn StoreAdapter>,
	locks: Arc<KeyedLock<i64>>,
}

impl BalanceLedger {
	pub fn new(store: Arc<dyn StoreAdapter>, locks: Arc<KeyedLock<i64>>) -> Self {
		BalanceLedger { store, locks }
	}

	/// Credits earnings. Idempotent per `(reference, reason)`.
	pub async fn credit(
		&self,
		user_id: UserId,
		amount: Usd,
		reason: LedgerReason,
		reference: Option<&str>,
	) -> PfResult<LedgerEntry> {
		if !amount.is_positive() {
			return Err(Error::Validation("credit amount must be positive".into()));
		}
		let _guard = self.locks.lock(user_id.0).await;
		if let Some(reference) = reference {
			if let Some(prior) = self.store.find_ledger_entry(reference, reason).await? {
				debug!("credit replay for {reference}, returning prior entry");
				return Ok(prior);
			}
		}
		let entry = self.store.apply_balance_delta(user_id, amount, reason, reference).await?;
		debug!("credited {} to user {} ({})", amount, user_id, reason.as_str());
		Ok(entry)
	}

	/// Signed correction applied by reconciliation. Idempotent per
	/// `(reference, reason)`; a replay with a different amount keeps the
	/// original entry and logs the discrepancy.
	pub async fn adjust(
		&self,
		user_id: UserId,
		delta: Usd,
		reason: LedgerReason,
		reference: &str,
	) -> PfResult<LedgerEntry> {
		if delta == Usd::ZERO {
			return Err(Error::Validation("adjustment delta must be non-zero".into()));
		}
		let _guard = self.locks.lock(user_id.0).await;
		if let Some(prior) = self.store.find_ledger_entry(reference, reason).await? {
			if prior.delta != delta {
				warn!(
					"adjustment replay for {reference} with {} differs from recorded {}",
					delta, prior.delta
				);
			}
			return Ok(prior);
		}
		self.store.apply_balance_delta(user_id, delta, reason, Some(reference)).await
	}

	/// Debits `amount` as a withdrawal hold. The debit IS the reservation:
	/// the funds leave the spendable balance immediately and only come back
	/// through [`BalanceLedger::release`]. Fails with `InsufficientBalance`
	/// when the current balance cannot cover the amount.
	pub async fn reserve(
		&self,
		user_id: UserId,
		amount: Usd,
		reference: &str,
	) -> PfResult<LedgerEntry> {
		if !amount.is_positive() {
			return Err(Error::Validation("reserve amount must be positive".into()));
		}
		let _guard = self.locks.lock(user_id.0).await;
		if let Some(prior) =
			self.store.find_ledger_entry(reference, LedgerReason::WithdrawReserve).await?
		{
			debug!("reserve replay for {reference}, returning prior entry");
			return Ok(prior);
		}
		let user = self.store.read_user(user_id).await?;
		if user.balance < amount {
			return Err(Error::InsufficientBalance);
		}
		let entry = self
			.store
			.apply_balance_delta(user_id, -amount, LedgerReason::WithdrawReserve, Some(reference))
			.await?;
		if entry.new_balance.is_negative() {
			// the balance check above ran under the user lock, so this
			// means the storage layer let a concurrent debit through
			error!(
				"balance of user {} went negative ({}) after reserve {}",
				user_id, entry.new_balance, reference
			);
			return Err(Error::InvariantViolation(format!(
				"negative balance after reserve {reference}"
			)));
		}
		info!("reserved {} of user {} for {}", amount, user_id, reference);
		Ok(entry)
	}

	/// Returns a failed or cancelled reservation to the balance. No-op
	/// (returns `None`) when the reference was never reserved or was
	/// already released.
	pub async fn release(
		&self,
		user_id: UserId,
		reference: &str,
	) -> PfResult<Option<LedgerEntry>> {
		let _guard = self.locks.lock(user_id.0).await;
		let Some(reserve) =
			self.store.find_ledger_entry(reference, LedgerReason::WithdrawReserve).await?
		else {
			debug!("release for {reference} without a reservation, skipping");
			return Ok(None);
		};
		if self
			.store
			.find_ledger_entry(reference, LedgerReason::ReservationRelease)
			.await?
			.is_some()
		{
			debug!("release replay for {reference}, skipping");
			return Ok(None);
		}
		let entry = self
			.store
			.apply_balance_delta(
				user_id,
				-reserve.delta,
				LedgerReason::ReservationRelease,
				Some(reference),
			)
			.await?;
		info!("released {} back to user {} for {}", -reserve.delta, user_id, reference);
		Ok(Some(entry))
	}

	/// Balance, income aggregates, and the most recent entries.
	pub async fn overview(&self, user_id: UserId) -> PfResult<BalanceOverview> {
		let user = self.store.read_user(user_id).await?;
		let at = now();
		let today_income = self.store.sum_income_since(user_id, pricing::day_start(at)).await?;
		let month_income = self.store.sum_income_since(user_id, pricing::month_start(at)).await?;
		let recent_entries = self.store.list_ledger_entries(user_id, 10).await?;
		Ok(BalanceOverview { balance: user.balance, today_income, month_income, recent_entries })
	}

	/// Checks `balance == sum of deltas` and rewrites the balance from the
	/// ledger when they disagree. The ledger is the source of truth; the
	/// balance field is a cached projection of it.
	pub async fn reconcile_user(&self, user_id: UserId) -> PfResult<BalanceAudit> {
		let _guard = self.locks.lock(user_id.0).await;
		let user = self.store.read_user(user_id).await?;
		let ledger_sum = self.store.sum_ledger_deltas(user_id).await?;
		if user.balance == ledger_sum {
			return Ok(BalanceAudit { balance: user.balance, ledger_sum, corrected: false });
		}
		warn!(
			"balance drift for user {}: balance {} vs ledger sum {}",
			user_id, user.balance, ledger_sum
		);
		self.store
			.rewrite_balance(user_id, ledger_sum, LedgerReason::BalanceDriftCorrection)
			.await?;
		Ok(BalanceAudit { balance: ledger_sum, ledger_sum, corrected: true })
	}
}

// vim: ts=4

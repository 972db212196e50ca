//! Withdrawal settlement against an asynchronous payout provider.
//!
//! The reservation model is optimistic: creating a withdrawal debits the
//! balance immediately (through the ledger), so the spendable balance is
//! always the balance field itself. The debit comes back only when the
//! payout fails or the request is cancelled. Provider outcomes arrive
//! twice — webhook callback and the poll sweep — and both funnel through
//! one guarded status transition, so a duplicate outcome is a no-op.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use peerflow_types::notify_adapter::{NotifyAdapter, NotifyKind};
use peerflow_types::payout_adapter::{PayoutAdapter, PayoutState, PayoutStatus, SubmitPayout};
use peerflow_types::prelude::*;
use peerflow_types::store_adapter::{
	CreateWithdrawalData, StoreAdapter, Withdrawal, WithdrawalStatus, WithdrawalTransition,
};

use crate::keyed_lock::KeyedLock;
use crate::ledger::BalanceLedger;
use crate::settings::WithdrawSettings;

#[derive(Debug)]
pub struct CreateWithdrawal<'a> {
	pub amount: Usd,
	pub wallet_address: &'a str,
	/// Defaults to the configured network when absent
	pub network: Option<&'a str>,
	/// Client-supplied retry token; generated when absent
	pub idempotency_key: Option<&'a str>,
}

/// Syntactic wallet address check per network. Not an on-chain check.
pub fn validate_wallet_address(address: &str, network: &str) -> PfResult<()> {
	let ok = match network {
		"BEP20" | "ERC20" => {
			address.len() == 42
				&& address.starts_with("0x")
				&& address[2..].bytes().all(|b| b.is_ascii_hexdigit())
		}
		"TRC20" => {
			address.len() == 34
				&& address.starts_with('T')
				&& address.bytes().all(|b| b.is_ascii_alphanumeric())
		}
		_ => return Err(Error::Validation(format!("unsupported payout network '{network}'"))),
	};
	if ok {
		Ok(())
	} else {
		Err(Error::Validation(format!("invalid {network} wallet address")))
	}
}

#[derive(Debug)]
pub struct WithdrawalEngine {
	store: Arc<dyn StoreAdapter>,
	ledger: Arc<BalanceLedger>,
	payout: Arc<dyn PayoutAdapter>,
	notify: Arc<dyn NotifyAdapter>,
	settings: WithdrawSettings,
	locks: KeyedLock<i64>,
}

impl WithdrawalEngine {
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		ledger: Arc<BalanceLedger>,
		payout: Arc<dyn PayoutAdapter>,
		notify: Arc<dyn NotifyAdapter>,
		settings: WithdrawSettings,
	) -> Self {
		WithdrawalEngine { store, ledger, payout, notify, settings, locks: KeyedLock::new() }
	}

	/// Creates a withdrawal request: bounds and address checks, the balance
	/// reservation, then the request row. A retry with the same idempotency
	/// key returns the existing request; an insufficient balance leaves no
	/// request behind.
	pub async fn create(
		&self,
		user_id: UserId,
		req: &CreateWithdrawal<'_>,
	) -> PfResult<Withdrawal> {
		if req.amount < self.settings.min_amount {
			return Err(Error::Validation(format!(
				"amount below minimum {}",
				self.settings.min_amount
			)));
		}
		if req.amount > self.settings.max_amount {
			return Err(Error::Validation(format!(
				"amount above maximum {}",
				self.settings.max_amount
			)));
		}
		let network = req.network.unwrap_or(&self.settings.default_network);
		validate_wallet_address(req.wallet_address, network)?;

		if let Some(key) = req.idempotency_key {
			if let Some(existing) = self.store.find_withdrawal_by_key(key).await? {
				if existing.user_id != user_id {
					return Err(Error::PermissionDenied);
				}
				debug!("withdrawal create replay for key {key}");
				return Ok(existing);
			}
		}
		let key: Box<str> = match req.idempotency_key {
			Some(key) => key.into(),
			None => Uuid::new_v4().simple().to_string().into(),
		};

		// the ledger debit doubles as the idempotency anchor: a retry that
		// died between reserve and row insert replays the same reference
		self.ledger.reserve(user_id, req.amount, &key).await?;

		let created = self
			.store
			.create_withdrawal(&CreateWithdrawalData {
				user_id,
				amount: req.amount,
				wallet_address: req.wallet_address,
				network,
				idempotency_key: &key,
				created_at: now(),
			})
			.await;
		let withdrawal = match created {
			Ok(w) => w,
			Err(Error::StateConflict("duplicate_idempotency_key")) => {
				// concurrent create with the same key won the insert
				return self
					.store
					.find_withdrawal_by_key(&key)
					.await?
					.ok_or(Error::StateConflict("duplicate_idempotency_key"));
			}
			Err(err) => {
				if let Err(release_err) = self.ledger.release(user_id, &key).await {
					error!("could not release reservation {key}: {release_err}");
				}
				return Err(err);
			}
		};
		info!(
			"withdrawal #{} created: {} to {} for user {}",
			withdrawal.withdrawal_id, withdrawal.amount, withdrawal.network, user_id
		);
		Ok(withdrawal)
	}

	/// Submits a pending withdrawal to the provider. A provider timeout or
	/// outage leaves the request in `processing` for the poll sweep; a
	/// provider rejection fails it and returns the reservation.
	pub async fn dispatch(&self, withdrawal_id: i64) -> PfResult<()> {
		let _guard = self.locks.lock(withdrawal_id).await;
		let withdrawal = self.store.read_withdrawal(withdrawal_id).await?;
		if withdrawal.status != WithdrawalStatus::Pending {
			return Ok(());
		}
		self.store
			.transition_withdrawal(
				withdrawal_id,
				&WithdrawalTransition {
					from: &[WithdrawalStatus::Pending],
					to: WithdrawalStatus::Processing,
					payout_id: None,
					tx_hash: None,
					note: None,
					processed_at: None,
				},
			)
			.await?;
		self.submit(&withdrawal).await
	}

	/// Provider submit for a processing withdrawal. Callers hold the lock.
	async fn submit(&self, withdrawal: &Withdrawal) -> PfResult<()> {
		let deadline = Duration::from_secs(self.settings.provider_deadline_secs);
		let submit = SubmitPayout {
			amount: withdrawal.amount,
			wallet_address: &withdrawal.wallet_address,
			network: &withdrawal.network,
			idempotency_key: &withdrawal.idempotency_key,
		};
		let receipt = match tokio::time::timeout(deadline, self.payout.submit(&submit)).await {
			Ok(Ok(receipt)) => receipt,
			Ok(Err(Error::UpstreamUnavailable(msg))) => {
				warn!(
					"provider unavailable for withdrawal #{}, poll sweep will retry: {msg}",
					withdrawal.withdrawal_id
				);
				return Ok(());
			}
			Ok(Err(err)) => {
				// hard rejection: fail and give the funds back
				warn!("provider rejected withdrawal #{}: {err}", withdrawal.withdrawal_id);
				let status = PayoutStatus {
					state: PayoutState::Failed,
					tx_hash: None,
					reason: Some(err.to_string().into()),
				};
				return self.apply_status(withdrawal, &status).await;
			}
			Err(_) => {
				warn!(
					"provider submit for withdrawal #{} timed out, poll sweep will retry",
					withdrawal.withdrawal_id
				);
				return Ok(());
			}
		};

		self.store
			.transition_withdrawal(
				withdrawal.withdrawal_id,
				&WithdrawalTransition {
					from: &[WithdrawalStatus::Processing],
					to: WithdrawalStatus::Processing,
					payout_id: Some(&receipt.payout_id),
					tx_hash: None,
					note: None,
					processed_at: None,
				},
			)
			.await?;
		info!(
			"withdrawal #{} submitted as payout {}",
			withdrawal.withdrawal_id, receipt.payout_id
		);
		self.apply_status(withdrawal, &receipt.status).await
	}

	/// Applies one provider outcome. Callers hold the lock. Both the
	/// webhook path and the poll sweep end up here, and the guarded
	/// transition makes the second arrival a no-op.
	async fn apply_status(&self, withdrawal: &Withdrawal, status: &PayoutStatus) -> PfResult<()> {
		let id = withdrawal.withdrawal_id;
		match status.state {
			PayoutState::Sending | PayoutState::Confirming => {
				self.store
					.transition_withdrawal(
						id,
						&WithdrawalTransition {
							from: &[WithdrawalStatus::Pending],
							to: WithdrawalStatus::Processing,
							payout_id: None,
							tx_hash: status.tx_hash.as_deref(),
							note: None,
							processed_at: None,
						},
					)
					.await?;
				Ok(())
			}
			PayoutState::Confirmed => {
				let applied = self
					.store
					.transition_withdrawal(
						id,
						&WithdrawalTransition {
							from: &[WithdrawalStatus::Pending, WithdrawalStatus::Processing],
							to: WithdrawalStatus::Completed,
							payout_id: None,
							tx_hash: status.tx_hash.as_deref(),
							note: None,
							processed_at: Some(now()),
						},
					)
					.await?;
				if applied {
					info!("withdrawal #{id} completed");
					self.notify_outcome(withdrawal, NotifyKind::PayoutCompleted, status);
				}
				Ok(())
			}
			PayoutState::Failed => {
				let applied = self
					.store
					.transition_withdrawal(
						id,
						&WithdrawalTransition {
							from: &[WithdrawalStatus::Pending, WithdrawalStatus::Processing],
							to: WithdrawalStatus::Failed,
							payout_id: None,
							tx_hash: None,
							note: status.reason.as_deref(),
							processed_at: Some(now()),
						},
					)
					.await?;
				if applied {
					warn!(
						"withdrawal #{id} failed: {}",
						status.reason.as_deref().unwrap_or("no reason given")
					);
					self.release_reservation(withdrawal).await?;
					self.notify_outcome(withdrawal, NotifyKind::PayoutFailed, status);
				}
				Ok(())
			}
		}
	}

	async fn release_reservation(&self, withdrawal: &Withdrawal) -> PfResult<()> {
		self.store.clear_withdrawal_reserved(withdrawal.withdrawal_id).await?;
		self.ledger.release(withdrawal.user_id, &withdrawal.idempotency_key).await?;
		Ok(())
	}

	fn notify_outcome(&self, withdrawal: &Withdrawal, kind: NotifyKind, status: &PayoutStatus) {
		let notify = Arc::clone(&self.notify);
		let user_id = withdrawal.user_id;
		let payload = serde_json::json!({
			"withdrawalId": withdrawal.withdrawal_id,
			"amount": withdrawal.amount,
			"txHash": status.tx_hash.as_deref(),
		});
		tokio::spawn(async move {
			notify.notify(user_id, kind, payload).await;
		});
	}

	/// Relayed provider callback. Unknown payout ids are reported as
	/// `NotFound`; outcomes for already terminal requests are no-ops.
	pub async fn apply_provider_callback(
		&self,
		payout_id: &str,
		status: &PayoutStatus,
	) -> PfResult<()> {
		let Some(found) = self.store.find_withdrawal_by_payout(payout_id).await? else {
			warn!("callback for unknown payout {payout_id}");
			return Err(Error::NotFound);
		};
		let _guard = self.locks.lock(found.withdrawal_id).await;
		let withdrawal = self.store.read_withdrawal(found.withdrawal_id).await?;
		if withdrawal.status.is_terminal() {
			debug!("callback replay for settled withdrawal #{}", withdrawal.withdrawal_id);
			return Ok(());
		}
		self.apply_status(&withdrawal, status).await
	}

	/// Operator cancellation. Only pending requests can be cancelled.
	pub async fn cancel(&self, withdrawal_id: i64) -> PfResult<Withdrawal> {
		let _guard = self.locks.lock(withdrawal_id).await;
		let withdrawal = self.store.read_withdrawal(withdrawal_id).await?;
		let applied = self
			.store
			.transition_withdrawal(
				withdrawal_id,
				&WithdrawalTransition {
					from: &[WithdrawalStatus::Pending],
					to: WithdrawalStatus::Cancelled,
					payout_id: None,
					tx_hash: None,
					note: Some("cancelled by operator"),
					processed_at: Some(now()),
				},
			)
			.await?;
		if !applied {
			return Err(Error::StateConflict("withdrawal_not_pending"));
		}
		self.release_reservation(&withdrawal).await?;
		info!("withdrawal #{withdrawal_id} cancelled");
		self.store.read_withdrawal(withdrawal_id).await
	}

	/// Poll sweep body: stuck pending requests are dispatched, processing
	/// ones with a payout id are polled, processing ones without are
	/// re-submitted (the provider dedupes on the idempotency key).
	pub async fn poll_unsettled(&self) -> PfResult<u32> {
		let mut settled_or_advanced = 0;
		for stub in self.store.list_unsettled_withdrawals().await? {
			let _guard = self.locks.lock(stub.withdrawal_id).await;
			let withdrawal = self.store.read_withdrawal(stub.withdrawal_id).await?;
			let outcome = match (withdrawal.status, &withdrawal.payout_id) {
				(WithdrawalStatus::Pending, _) => {
					self.store
						.transition_withdrawal(
							withdrawal.withdrawal_id,
							&WithdrawalTransition {
								from: &[WithdrawalStatus::Pending],
								to: WithdrawalStatus::Processing,
								payout_id: None,
								tx_hash: None,
								note: None,
								processed_at: None,
							},
						)
						.await?;
					self.submit(&withdrawal).await
				}
				(WithdrawalStatus::Processing, Some(payout_id)) => {
					match self.payout.check_status(payout_id).await {
						Ok(status) => self.apply_status(&withdrawal, &status).await,
						Err(Error::UpstreamUnavailable(msg)) => {
							warn!("status poll for payout {payout_id} unavailable: {msg}");
							continue;
						}
						Err(err) => Err(err),
					}
				}
				(WithdrawalStatus::Processing, None) => self.submit(&withdrawal).await,
				_ => continue,
			};
			match outcome {
				Ok(()) => settled_or_advanced += 1,
				Err(err) => {
					error!("poll of withdrawal #{} failed: {err}", withdrawal.withdrawal_id);
				}
			}
		}
		Ok(settled_or_advanced)
	}

	pub async fn read(&self, withdrawal_id: i64) -> PfResult<Withdrawal> {
		self.store.read_withdrawal(withdrawal_id).await
	}

	pub async fn list(&self, user_id: UserId, limit: u32) -> PfResult<Vec<Withdrawal>> {
		self.store.list_withdrawals(user_id, limit).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bep20_addresses() {
		let addr = "0x1234567890abcdef1234567890ABCDEF12345678";
		assert!(validate_wallet_address(addr, "BEP20").is_ok());
		assert!(validate_wallet_address(addr, "ERC20").is_ok());
		assert!(validate_wallet_address("0x12345", "BEP20").is_err());
		assert!(validate_wallet_address(&addr.replace("0x", "1x"), "BEP20").is_err());
		assert!(validate_wallet_address("0xZZ34567890abcdef1234567890ABCDEF12345678", "BEP20")
			.is_err());
	}

	#[test]
	fn trc20_addresses() {
		assert!(validate_wallet_address("TJRabPrwbZy45sbavfcjinPJC18kjpRTv8", "TRC20").is_ok());
		assert!(validate_wallet_address("AJRabPrwbZy45sbavfcjinPJC18kjpRTv8", "TRC20").is_err());
		assert!(validate_wallet_address("TJRab", "TRC20").is_err());
	}

	#[test]
	fn unknown_network_rejected() {
		assert!(matches!(
			validate_wallet_address("whatever", "SOL"),
			Err(Error::Validation(_))
		));
	}
}

// vim: ts=4

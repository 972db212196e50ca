mod common;

use common::{ctx, settle_tasks, MockPayout, PayoutScript};
use peerflow_core::withdraw::CreateWithdrawal;
use peerflow_types::notify_adapter::NotifyKind;
use peerflow_types::payout_adapter::{PayoutReceipt, PayoutState, PayoutStatus};
use peerflow_types::prelude::*;
use peerflow_types::store_adapter::{LedgerReason, StoreAdapter, WithdrawalStatus};

const USER: &str = "user:1";
const ALICE: UserId = UserId(1);
const WALLET: &str = "0x1234567890abcdef1234567890abcdef12345678";

async fn fund(t: &common::TestCtx, dollars: i64) {
	t.app
		.ledger
		.credit(ALICE, Usd::from_dollars(dollars), LedgerReason::AdminAdjustment, Some("seed"))
		.await
		.unwrap();
}

fn request(amount: Usd, key: Option<&'static str>) -> CreateWithdrawal<'static> {
	CreateWithdrawal { amount, wallet_address: WALLET, network: None, idempotency_key: key }
}

#[tokio::test]
async fn withdrawal_completes_against_confirming_provider() {
	let t = ctx().await;
	fund(&t, 100).await;

	let withdrawal =
		t.api.create_withdrawal(USER, &request(Usd::from_dollars(50), None)).await.unwrap();
	assert_eq!(withdrawal.status, WithdrawalStatus::Completed);
	assert_eq!(withdrawal.tx_hash.as_deref(), Some("0xdeadbeef"));
	assert!(withdrawal.payout_id.is_some());

	// the reservation stays spent on success
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(50));
	settle_tasks().await;
	assert_eq!(t.notify.kinds(), vec![NotifyKind::PayoutCompleted]);
}

#[tokio::test]
async fn insufficient_balance_leaves_no_request() {
	let t = ctx().await;
	fund(&t, 40).await;

	let err =
		t.api.create_withdrawal(USER, &request(Usd::from_dollars(50), None)).await.unwrap_err();
	assert!(matches!(err, Error::InsufficientBalance));
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(40));
	assert!(t.api.list_withdrawals(USER, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn amount_bounds_are_enforced() {
	let t = ctx().await;
	fund(&t, 1000).await;

	let below = t.api.create_withdrawal(USER, &request(Usd::from_dollars(5), None)).await;
	assert!(matches!(below, Err(Error::Validation(_))));
	let above = t.api.create_withdrawal(USER, &request(Usd::from_dollars(900), None)).await;
	assert!(matches!(above, Err(Error::Validation(_))));
}

#[tokio::test]
async fn malformed_wallet_rejected() {
	let t = ctx().await;
	fund(&t, 100).await;
	let req = CreateWithdrawal {
		amount: Usd::from_dollars(20),
		wallet_address: "0xnothex",
		network: None,
		idempotency_key: None,
	};
	assert!(matches!(t.api.create_withdrawal(USER, &req).await, Err(Error::Validation(_))));
}

#[tokio::test]
async fn create_with_same_key_returns_existing_request() {
	let t = ctx().await;
	fund(&t, 100).await;

	let first = t
		.api
		.create_withdrawal(USER, &request(Usd::from_dollars(20), Some("retry-1")))
		.await
		.unwrap();
	let replay = t
		.api
		.create_withdrawal(USER, &request(Usd::from_dollars(20), Some("retry-1")))
		.await
		.unwrap();
	assert_eq!(first.withdrawal_id, replay.withdrawal_id);
	// one reservation, not two
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(80));
}

#[tokio::test]
async fn provider_outage_parks_request_for_the_sweep() {
	let t = ctx().await;
	fund(&t, 100).await;
	t.payout.script_submit(PayoutScript::Unavailable);

	let withdrawal =
		t.api.create_withdrawal(USER, &request(Usd::from_dollars(30), None)).await.unwrap();
	assert_eq!(withdrawal.status, WithdrawalStatus::Processing);
	assert!(withdrawal.payout_id.is_none());
	// funds stay reserved while the outcome is unknown
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(70));

	// next sweep re-submits with the same idempotency key and succeeds
	assert_eq!(t.app.withdrawals.poll_unsettled().await.unwrap(), 1);
	let settled = t.app.withdrawals.read(withdrawal.withdrawal_id).await.unwrap();
	assert_eq!(settled.status, WithdrawalStatus::Completed);
	assert_eq!(*t.payout.submit_count.lock(), 2);
}

#[tokio::test]
async fn provider_rejection_fails_and_refunds() {
	let t = ctx().await;
	fund(&t, 100).await;
	t.payout.script_submit(PayoutScript::Reject("address blacklisted"));

	let withdrawal =
		t.api.create_withdrawal(USER, &request(Usd::from_dollars(30), None)).await.unwrap();
	assert_eq!(withdrawal.status, WithdrawalStatus::Failed);
	assert_eq!(withdrawal.note.as_deref(), Some("validation error: address blacklisted"));
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(100));

	settle_tasks().await;
	assert_eq!(t.notify.kinds(), vec![NotifyKind::PayoutFailed]);
}

#[tokio::test]
async fn callback_confirms_inflight_payout() {
	let t = ctx().await;
	fund(&t, 100).await;
	t.payout.script_submit(PayoutScript::Receipt(PayoutReceipt {
		payout_id: "pay_77".into(),
		status: PayoutStatus { state: PayoutState::Sending, tx_hash: None, reason: None },
	}));

	let withdrawal =
		t.api.create_withdrawal(USER, &request(Usd::from_dollars(30), None)).await.unwrap();
	assert_eq!(withdrawal.status, WithdrawalStatus::Processing);
	assert_eq!(withdrawal.payout_id.as_deref(), Some("pay_77"));

	t.api.provider_callback("pay_77", &MockPayout::confirmed("0xabc")).await.unwrap();
	let settled = t.app.withdrawals.read(withdrawal.withdrawal_id).await.unwrap();
	assert_eq!(settled.status, WithdrawalStatus::Completed);
	assert_eq!(settled.tx_hash.as_deref(), Some("0xabc"));
}

#[tokio::test]
async fn duplicate_failed_callback_refunds_once() {
	let t = ctx().await;
	fund(&t, 100).await;
	t.payout.script_submit(PayoutScript::Receipt(PayoutReceipt {
		payout_id: "pay_88".into(),
		status: PayoutStatus { state: PayoutState::Sending, tx_hash: None, reason: None },
	}));
	t.api.create_withdrawal(USER, &request(Usd::from_dollars(30), None)).await.unwrap();
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(70));

	let failed = MockPayout::failed("gas spike");
	t.api.provider_callback("pay_88", &failed).await.unwrap();
	t.api.provider_callback("pay_88", &failed).await.unwrap();

	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(100));
	settle_tasks().await;
	assert_eq!(t.notify.kinds(), vec![NotifyKind::PayoutFailed]);
}

#[tokio::test]
async fn callback_for_unknown_payout_is_not_found() {
	let t = ctx().await;
	let err =
		t.api.provider_callback("pay_missing", &MockPayout::confirmed("0x1")).await.unwrap_err();
	assert!(matches!(err, Error::NotFound));
}

#[tokio::test]
async fn poll_sweep_applies_provider_status() {
	let t = ctx().await;
	fund(&t, 100).await;
	t.payout.script_submit(PayoutScript::Receipt(PayoutReceipt {
		payout_id: "pay_99".into(),
		status: PayoutStatus { state: PayoutState::Confirming, tx_hash: None, reason: None },
	}));
	let withdrawal =
		t.api.create_withdrawal(USER, &request(Usd::from_dollars(30), None)).await.unwrap();
	assert_eq!(withdrawal.status, WithdrawalStatus::Processing);

	t.payout.set_status("pay_99", MockPayout::confirmed("0xfeed"));
	t.app.withdrawals.poll_unsettled().await.unwrap();
	let settled = t.app.withdrawals.read(withdrawal.withdrawal_id).await.unwrap();
	assert_eq!(settled.status, WithdrawalStatus::Completed);
}

#[tokio::test]
async fn operator_cancel_refunds_pending_request() {
	let t = ctx().await;
	fund(&t, 100).await;

	// created but never dispatched (operator intervenes first)
	let withdrawal = t
		.app
		.withdrawals
		.create(ALICE, &request(Usd::from_dollars(30), None))
		.await
		.unwrap();
	assert_eq!(withdrawal.status, WithdrawalStatus::Pending);

	let err = t.api.cancel_withdrawal(USER, withdrawal.withdrawal_id).await.unwrap_err();
	assert!(matches!(err, Error::PermissionDenied));

	let cancelled =
		t.api.cancel_withdrawal("admin:9", withdrawal.withdrawal_id).await.unwrap();
	assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(100));

	let again = t.api.cancel_withdrawal("admin:9", withdrawal.withdrawal_id).await.unwrap_err();
	assert!(matches!(again, Error::StateConflict("withdrawal_not_pending")));
}

// vim: ts=4

mod common;

use common::ctx;
use peerflow_types::prelude::*;
use peerflow_types::store_adapter::{LedgerReason, StoreAdapter};

const ALICE: UserId = UserId(1);

#[tokio::test]
async fn credit_with_reference_is_idempotent() {
	let t = ctx().await;
	let first = t
		.app
		.ledger
		.credit(ALICE, Usd::from_dollars(3), LedgerReason::SessionSettlement, Some("sess_a"))
		.await
		.unwrap();
	let replay = t
		.app
		.ledger
		.credit(ALICE, Usd::from_dollars(3), LedgerReason::SessionSettlement, Some("sess_a"))
		.await
		.unwrap();
	assert_eq!(first.entry_id, replay.entry_id);
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(3));
	assert_eq!(t.store.ledger_len(), 1);
}

#[tokio::test]
async fn non_positive_credit_rejected() {
	let t = ctx().await;
	let err = t
		.app
		.ledger
		.credit(ALICE, Usd::ZERO, LedgerReason::SessionSettlement, None)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn reserve_requires_sufficient_balance() {
	let t = ctx().await;
	t.app
		.ledger
		.credit(ALICE, Usd::from_dollars(40), LedgerReason::AdminAdjustment, Some("seed"))
		.await
		.unwrap();

	let err = t.app.ledger.reserve(ALICE, Usd::from_dollars(50), "wd_1").await.unwrap_err();
	assert!(matches!(err, Error::InsufficientBalance));
	// nothing was debited, nothing was appended
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(40));
	assert_eq!(t.store.ledger_len(), 1);
}

#[tokio::test]
async fn reserve_and_release_round_trip() {
	let t = ctx().await;
	t.app
		.ledger
		.credit(ALICE, Usd::from_dollars(100), LedgerReason::AdminAdjustment, Some("seed"))
		.await
		.unwrap();

	t.app.ledger.reserve(ALICE, Usd::from_dollars(60), "wd_1").await.unwrap();
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(40));

	let released = t.app.ledger.release(ALICE, "wd_1").await.unwrap();
	assert_eq!(released.expect("release entry").delta, Usd::from_dollars(60));
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(100));

	// second release and a release without a reservation are no-ops
	assert!(t.app.ledger.release(ALICE, "wd_1").await.unwrap().is_none());
	assert!(t.app.ledger.release(ALICE, "wd_never").await.unwrap().is_none());
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(100));
}

#[tokio::test]
async fn reserve_replay_does_not_double_debit() {
	let t = ctx().await;
	t.app
		.ledger
		.credit(ALICE, Usd::from_dollars(100), LedgerReason::AdminAdjustment, Some("seed"))
		.await
		.unwrap();

	t.app.ledger.reserve(ALICE, Usd::from_dollars(30), "wd_1").await.unwrap();
	t.app.ledger.reserve(ALICE, Usd::from_dollars(30), "wd_1").await.unwrap();
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(70));
}

#[tokio::test]
async fn adjust_applies_signed_deltas_once() {
	let t = ctx().await;
	t.app
		.ledger
		.credit(ALICE, Usd::from_dollars(10), LedgerReason::AdminAdjustment, Some("seed"))
		.await
		.unwrap();

	t.app
		.ledger
		.adjust(ALICE, Usd::from_cents(-250), LedgerReason::EarningsCorrection, "corr_1")
		.await
		.unwrap();
	t.app
		.ledger
		.adjust(ALICE, Usd::from_cents(-250), LedgerReason::EarningsCorrection, "corr_1")
		.await
		.unwrap();
	assert_eq!(
		t.store.read_user(ALICE).await.unwrap().balance,
		Usd::from_dollars(10) - Usd::from_cents(250)
	);

	let err = t
		.app
		.ledger
		.adjust(ALICE, Usd::ZERO, LedgerReason::EarningsCorrection, "corr_2")
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn balance_always_equals_ledger_sum() {
	let t = ctx().await;
	let ledger = &t.app.ledger;
	ledger
		.credit(ALICE, Usd::from_dollars(80), LedgerReason::AdminAdjustment, Some("seed"))
		.await
		.unwrap();
	ledger.reserve(ALICE, Usd::from_dollars(25), "wd_1").await.unwrap();
	ledger
		.credit(ALICE, Usd::from_cents(137), LedgerReason::SessionSettlement, Some("sess_x"))
		.await
		.unwrap();
	ledger.release(ALICE, "wd_1").await.unwrap();
	ledger
		.adjust(ALICE, Usd::from_cents(-9), LedgerReason::EarningsCorrection, "corr_1")
		.await
		.unwrap();

	let user = t.store.read_user(ALICE).await.unwrap();
	let sum = t.store.sum_ledger_deltas(ALICE).await.unwrap();
	assert_eq!(user.balance, sum);
}

#[tokio::test]
async fn drift_correction_rewrites_balance_from_ledger() {
	let t = ctx().await;
	t.app
		.ledger
		.credit(ALICE, Usd::from_dollars(12), LedgerReason::SessionSettlement, Some("sess_a"))
		.await
		.unwrap();

	t.store.corrupt_balance(ALICE, Usd::from_dollars(99));
	let audit = t.app.ledger.reconcile_user(ALICE).await.unwrap();
	assert!(audit.corrected);
	assert_eq!(audit.ledger_sum, Usd::from_dollars(12));
	assert_eq!(t.store.read_user(ALICE).await.unwrap().balance, Usd::from_dollars(12));

	// the correction entry itself carries no delta, so the invariant holds
	assert_eq!(t.store.sum_ledger_deltas(ALICE).await.unwrap(), Usd::from_dollars(12));
	let clean = t.app.ledger.reconcile_user(ALICE).await.unwrap();
	assert!(!clean.corrected);
}

#[tokio::test]
async fn overview_reports_income_and_recent_entries() {
	let t = ctx().await;
	for i in 0..12 {
		t.app
			.ledger
			.credit(
				ALICE,
				Usd::from_cents(100),
				LedgerReason::SessionSettlement,
				Some(&format!("sess_{i}")),
			)
			.await
			.unwrap();
	}

	let overview = t.api.balance_overview("user:1").await.unwrap();
	assert_eq!(overview.balance, Usd::from_cents(1200));
	assert_eq!(overview.today_income, Usd::from_cents(1200));
	assert_eq!(overview.month_income, Usd::from_cents(1200));
	assert_eq!(overview.recent_entries.len(), 10);
}

#[tokio::test]
async fn concurrent_credits_never_lose_an_update() {
	let t = ctx().await;
	let mut handles = Vec::new();
	for i in 0..20 {
		let ledger = t.app.ledger.clone();
		handles.push(tokio::spawn(async move {
			ledger
				.credit(
					ALICE,
					Usd::from_cents(10),
					LedgerReason::SessionSettlement,
					Some(&format!("sess_{i}")),
				)
				.await
				.unwrap();
		}));
	}
	for h in handles {
		h.await.unwrap();
	}
	let user = t.store.read_user(ALICE).await.unwrap();
	assert_eq!(user.balance, Usd::from_cents(200));
	assert_eq!(user.balance, t.store.sum_ledger_deltas(ALICE).await.unwrap());
}

// vim: ts=4

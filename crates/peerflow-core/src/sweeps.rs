//! The engine's periodic sweeps.

use async_trait::async_trait;
use std::sync::Arc;

use peerflow_types::prelude::*;

use crate::app::App;
use crate::scheduler::{Sweep, SweepScheduler};

/// Closes and settles sessions that stopped reporting.
#[derive(Debug)]
pub struct OrphanSweep;

#[async_trait]
impl Sweep for OrphanSweep {
	fn name(&self) -> &'static str {
		"orphan-reclaim"
	}

	async fn run(&self, app: &App) -> PfResult<()> {
		let reclaimed = app.sessions.reclaim_orphans().await?;
		if reclaimed > 0 {
			info!("orphan sweep reclaimed {reclaimed} sessions");
		}
		Ok(())
	}
}

/// Re-checks counters and earnings of recently completed sessions.
#[derive(Debug)]
pub struct SessionReconcileSweep;

#[async_trait]
impl Sweep for SessionReconcileSweep {
	fn name(&self) -> &'static str {
		"session-reconcile"
	}

	async fn run(&self, app: &App) -> PfResult<()> {
		let corrected = app.reconciliation.reconcile_recent().await?;
		if corrected > 0 {
			warn!("session reconcile sweep corrected {corrected} sessions");
		}
		Ok(())
	}
}

/// Verifies `balance == sum of ledger deltas` for every user.
#[derive(Debug)]
pub struct BalanceReconcileSweep;

#[async_trait]
impl Sweep for BalanceReconcileSweep {
	fn name(&self) -> &'static str {
		"balance-reconcile"
	}

	async fn run(&self, app: &App) -> PfResult<()> {
		let corrected = app.reconciliation.reconcile_all_balances().await?;
		if corrected > 0 {
			warn!("balance reconcile sweep corrected {corrected} users");
		}
		Ok(())
	}
}

/// Advances unsettled withdrawals: dispatches stuck pending ones, polls
/// the provider for processing ones.
#[derive(Debug)]
pub struct PayoutSweep;

#[async_trait]
impl Sweep for PayoutSweep {
	fn name(&self) -> &'static str {
		"payout-poll"
	}

	async fn run(&self, app: &App) -> PfResult<()> {
		app.withdrawals.poll_unsettled().await?;
		Ok(())
	}
}

/// Registers the standard sweep set on its production schedules.
pub fn register_default_sweeps(scheduler: &mut SweepScheduler) -> PfResult<()> {
	scheduler.register("*/5 * * * *", Arc::new(OrphanSweep))?;
	scheduler.register("*/10 * * * *", Arc::new(PayoutSweep))?;
	scheduler.register("17 * * * *", Arc::new(SessionReconcileSweep))?;
	scheduler.register("43 3 * * *", Arc::new(BalanceReconcileSweep))?;
	Ok(())
}

// vim: ts=4

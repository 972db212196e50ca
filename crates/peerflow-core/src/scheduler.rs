//! Cron-driven sweep scheduler.
//!
//! Each sweep is a periodic maintenance pass over shared state (orphan
//! reclaim, reconciliation, payout polling). One tokio task per sweep
//! sleeps until the next cron occurrence, runs, and logs failures without
//! dying; the next occurrence always comes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use croner::Cron;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use peerflow_types::prelude::*;

use crate::app::App;

/// Cron schedule wrapper using the croner crate (5 fields: minute hour
/// day month weekday).
#[derive(Clone, Debug)]
pub struct CronSchedule {
	expr: Box<str>,
	cron: Cron,
}

impl CronSchedule {
	pub fn parse(expr: &str) -> PfResult<Self> {
		let cron = Cron::from_str(expr)
			.map_err(|e| Error::Validation(format!("invalid cron expression '{expr}': {e}")))?;
		Ok(Self { expr: expr.into(), cron })
	}

	pub fn next_execution(&self, after: Timestamp) -> PfResult<Timestamp> {
		let dt = DateTime::<Utc>::from_timestamp(after.0, 0).unwrap_or_else(Utc::now);
		self.cron
			.find_next_occurrence(&dt, false)
			.map(|next| Timestamp(next.timestamp()))
			.map_err(|e| {
				Error::Validation(format!("no next occurrence for '{}': {e}", self.expr))
			})
	}

	pub fn expr(&self) -> &str {
		&self.expr
	}
}

#[async_trait]
pub trait Sweep: Debug + Send + Sync {
	fn name(&self) -> &'static str;
	async fn run(&self, app: &App) -> PfResult<()>;
}

/// Registers sweeps with their schedules, then runs each on its own task.
#[derive(Default)]
pub struct SweepScheduler {
	entries: Vec<(CronSchedule, Arc<dyn Sweep>)>,
}

impl SweepScheduler {
	pub fn new() -> Self {
		SweepScheduler { entries: Vec::new() }
	}

	pub fn register(&mut self, expr: &str, sweep: Arc<dyn Sweep>) -> PfResult<&mut Self> {
		let schedule = CronSchedule::parse(expr)?;
		info!("registered sweep '{}' on schedule '{}'", sweep.name(), schedule.expr());
		self.entries.push((schedule, sweep));
		Ok(self)
	}

	/// Spawns one looping task per registered sweep. Handles are returned
	/// so a caller that wants a clean shutdown can abort them.
	pub fn start(self, app: App) -> Vec<JoinHandle<()>> {
		self.entries
			.into_iter()
			.map(|(schedule, sweep)| {
				let app = app.clone();
				tokio::spawn(async move {
					loop {
						let next = match schedule.next_execution(now()) {
							Ok(next) => next,
							Err(err) => {
								// parse-time validation makes this unreachable
								// for sane expressions
								error!("sweep '{}' lost its schedule: {err}", sweep.name());
								return;
							}
						};
						let wait = u64::try_from(next.0 - now().0).unwrap_or_default();
						tokio::time::sleep(tokio::time::Duration::from_secs(wait)).await;

						debug!("running sweep '{}'", sweep.name());
						if let Err(err) = sweep.run(&app).await {
							error!("sweep '{}' failed: {err}", sweep.name());
						}
					}
				})
			})
			.collect()
	}
}


// vim: ts=4

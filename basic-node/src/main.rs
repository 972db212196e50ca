//! Minimal Peerflow node: SQLite storage, ip-api reputation, HTTP payouts,
//! development token identity, and the standard sweep set.
//!
//! Configuration comes from the environment:
//! - `DB_DIR`            data directory (default `./data`)
//! - `SETTINGS_FILE`     optional JSON settings overrides
//! - `IPAPI_BASE_URL`    reputation endpoint override
//! - `PAYOUT_BASE_URL`   payout provider endpoint
//! - `PAYOUT_API_KEY`    provider key; unset runs payouts in mock mode

use std::{env, fs, path::PathBuf, sync::Arc};

use peerflow_core::prelude::*;
use peerflow_core::scheduler::SweepScheduler;
use peerflow_core::settings::Settings;
use peerflow_core::sweeps::register_default_sweeps;
use peerflow_core::AppBuilder;
use peerflow_payout_adapter_http::HttpPayoutAdapter;
use peerflow_reputation_adapter_ipapi::IpApiReputationAdapter;
use peerflow_store_adapter_sqlite::StoreAdapterSqlite;

mod identity;
mod notify;

pub struct Config {
	pub db_dir: PathBuf,
	pub settings_file: Option<PathBuf>,
	pub ipapi_base_url: Option<String>,
	pub payout_base_url: String,
	pub payout_api_key: Option<String>,
}

impl Config {
	fn from_env() -> Self {
		Config {
			db_dir: PathBuf::from(env::var("DB_DIR").unwrap_or_else(|_| "./data".to_string())),
			settings_file: env::var("SETTINGS_FILE").ok().map(PathBuf::from),
			ipapi_base_url: env::var("IPAPI_BASE_URL").ok(),
			payout_base_url: env::var("PAYOUT_BASE_URL")
				.unwrap_or_else(|_| "http://localhost:8090".to_string()),
			payout_api_key: env::var("PAYOUT_API_KEY").ok(),
		}
	}
}

fn load_settings(config: &Config) -> PfResult<Settings> {
	match &config.settings_file {
		Some(path) => {
			let raw = fs::read_to_string(path)?;
			serde_json::from_str(&raw)
				.map_err(|err| Error::Validation(format!("settings file: {}", err)))
		}
		None => Ok(Settings::default()),
	}
}

#[tokio::main]
async fn main() -> PfResult<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let config = Config::from_env();
	let settings = load_settings(&config)?;
	fs::create_dir_all(&config.db_dir)?;

	let store = Arc::new(StoreAdapterSqlite::new(config.db_dir.join("store.db")).await?);
	let reputation = Arc::new(IpApiReputationAdapter::new(config.ipapi_base_url.as_deref())?);
	let payout = Arc::new(HttpPayoutAdapter::new(
		&config.payout_base_url,
		config.payout_api_key.as_deref(),
	)?);
	let identity = Arc::new(identity::DevTokenIdentity::new(store.clone()));

	let app = AppBuilder::new(settings)
		.store(store)
		.identity(identity)
		.reputation(reputation)
		.payout(payout)
		.notify(Arc::new(notify::LogNotify))
		.build()?;

	let mut scheduler = SweepScheduler::new();
	register_default_sweeps(&mut scheduler)?;
	let handles = scheduler.start(app);
	info!("peerflow node running, data in {}", config.db_dir.display());

	tokio::signal::ctrl_c().await?;
	info!("shutting down");
	for handle in handles {
		handle.abort();
	}

	Ok(())
}

// vim: ts=4

//! Peerflow is a traffic-sharing session engine.
//!
//! A device shares network traffic through a session that the engine
//! tracks, taxes into currency earnings, and eventually pays out:
//!
//! - admission filtering (IP reputation, region, VPN/proxy heuristics)
//! - session lifecycle with a server-authoritative traffic counter
//! - reconciliation of client claims against raw report deltas
//! - an append-only balance ledger with idempotent credit/reserve/release
//! - withdrawal settlement against an asynchronous payout provider
//!
//! External collaborators (identity, IP reputation, payout provider,
//! notification sink, storage) are consumed through the adapter traits in
//! `peerflow-types`; everything here is transport-agnostic.

#![forbid(unsafe_code)]

pub mod admission;
pub mod app;
pub mod keyed_lock;
pub mod ledger;
pub mod prelude;
pub mod pricing;
pub mod reconcile;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod sweeps;
pub mod withdraw;

pub use crate::app::{Api, App, AppBuilder, AppState};

// vim: ts=4

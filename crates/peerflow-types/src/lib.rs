//! Shared types, adapter traits, and core utilities for the Peerflow engine.
//!
//! This crate contains the foundational types that are shared between the
//! engine crate and all adapter implementations. Extracting these into a
//! separate crate allows adapter crates to compile in parallel with the
//! engine modules.

pub mod error;
pub mod identity_adapter;
pub mod notify_adapter;
pub mod payout_adapter;
pub mod prelude;
pub mod reputation_adapter;
pub mod store_adapter;
pub mod types;

// vim: ts=4

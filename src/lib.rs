//! Crashtrack: Crash Report Aggregation
//!
//! An engine that turns per-crash event files written by a crash reporter
//! into a deduplicated, queryable store of crash records, tracks submission
//! outcomes, emits one telemetry ping per new crash and prunes stale state
//! during periodic maintenance.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod ping;
pub mod process;
pub mod scanner;
pub mod store;

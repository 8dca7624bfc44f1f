//! # AggSync Core
//!
//! Shared building blocks for the AggSync aggregator and its clients.
//!
//! This crate provides:
//! - Lamport logical clock with a selectable reconciliation rule
//! - Readings (one producer's ordered key/value payload)
//! - The content store that merges readings into the latest view

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod store;

pub use clock::{ClockRule, LamportClock, ParseClockRuleError};
pub use store::{ContentStore, Reading, Snapshot};

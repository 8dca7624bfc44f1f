//! # AggSync Client
//!
//! Producer and consumer sides of the AggSync protocol.
//!
//! ## Clock discipline
//!
//! Each client owns a Lamport clock. It ticks before every request, sends
//! the value in the `Lamport-Clock` header, and reconciles with the value
//! the aggregator returns.
//!
//! ## Addresses
//!
//! Aggregator addresses may be given as `scheme://host:port`, `host:port`
//! or a bare `host`; the port defaults to 4567.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod client;
pub mod reading;

pub use address::{AddressError, ServerAddress, DEFAULT_PORT};
pub use client::{AggClient, ClientConfig, ClientError, GetReply, PutReply};
pub use reading::{load_reading, parse_reading, ReadingError};

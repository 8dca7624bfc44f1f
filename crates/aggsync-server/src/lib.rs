//! # AggSync Aggregator
//!
//! Central aggregation service. Producers PUT readings, consumers GET the
//! merged view, and every exchange carries a Lamport counter.
//!
//! ## Architecture
//!
//! - **Runtime**: accepts connections and spawns one task per connection
//! - **Dispatcher**: reads one request, routes GET/PUT, writes the response
//! - **State**: content store, eviction deadline and clock behind one lock
//! - **Eviction**: background worker that purges the store after inactivity

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod eviction;
pub mod runtime;
pub mod state;

pub use config::ServerConfig;
pub use dispatcher::{ConnectionError, Dispatcher, Phase};
pub use eviction::EvictionScheduler;
pub use runtime::Server;
pub use state::{Aggregator, AggregatorSettings, PutBody, PutOutcome, Stamped};

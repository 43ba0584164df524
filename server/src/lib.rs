//! dripmail: a durable, multi-tenant email scheduling service.
//!
//! Clients submit batches of recipients with a start time, inter-message
//! spacing, and an hourly cap; the service plans deterministic send
//! instants, defers the work through a persistent queue, and delivers
//! through SMTP under global and per-sender hourly rate limits. Work
//! survives restarts; transient failures retry with exponential backoff;
//! quota hits reschedule instead of dropping.
//!
//! Storage and queueing are pluggable behind the adapter traits in
//! `dripmail-types`; see the `dripmail-store-adapter-sqlite` and
//! `dripmail-queue-adapter-sqlite` crates for the SQLite implementations.

pub mod auth;
pub mod core;
pub mod email;
pub mod maintenance;
pub mod prelude;
pub mod rate_limit;
pub mod routes;
pub mod sender;
pub mod transport;

// Shared types and adapter contracts, re-exported so dependents see one
// coherent `dripmail::` namespace
pub use dripmail_types::{
	error, identity_provider_adapter, queue_adapter, store_adapter, transport_adapter, types,
};

pub use crate::core::app::{App, AppBuilder, AppState};

// vim: ts=4

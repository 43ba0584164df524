//! Shared types, adapter traits, and core utilities for the dripmail platform.
//!
//! This crate contains the foundational types shared between the server crate
//! and the adapter implementations. Extracting these into a separate crate
//! lets adapter crates compile without the server's feature modules, and lets
//! the server dev-depend on real adapters for integration tests.

pub mod error;
pub mod identity_provider_adapter;
pub mod prelude;
pub mod queue_adapter;
pub mod store_adapter;
pub mod transport_adapter;
pub mod types;

// vim: ts=4

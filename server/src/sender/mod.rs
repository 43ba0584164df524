//! Sender identity management

pub mod handler;

// vim: ts=4

//! Fast-path hour counters
//!
//! The backend only has to be approximately durable: losing it costs at most
//! one over-send per process restart, which the design accepts. An external
//! atomic counter (e.g. a Redis INCR with TTL) plugs in behind the same
//! trait.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::prelude::*;

#[async_trait]
pub trait CounterBackend: Send + Sync {
	/// Current value for `key`; missing keys count as zero
	async fn get(&self, key: &str) -> ClResult<u64>;

	/// Atomically add one, setting `ttl` when the key is created
	async fn incr(&self, key: &str, ttl: Duration) -> ClResult<u64>;
}

/// Process-local counter map with TTL expiry
#[derive(Debug, Default)]
pub struct InMemoryCounterBackend {
	counters: Mutex<HashMap<Box<str>, (u64, Instant)>>,
}

impl InMemoryCounterBackend {
	pub fn new() -> Self {
		Self::default()
	}

	fn prune(counters: &mut HashMap<Box<str>, (u64, Instant)>) {
		let now = Instant::now();
		counters.retain(|_, (_, expires)| *expires > now);
	}
}

#[async_trait]
impl CounterBackend for InMemoryCounterBackend {
	async fn get(&self, key: &str) -> ClResult<u64> {
		let mut counters = self.counters.lock();
		Self::prune(&mut counters);
		Ok(counters.get(key).map(|(n, _)| *n).unwrap_or(0))
	}

	async fn incr(&self, key: &str, ttl: Duration) -> ClResult<u64> {
		let mut counters = self.counters.lock();
		Self::prune(&mut counters);
		let entry = counters
			.entry(key.into())
			.or_insert_with(|| (0, Instant::now() + ttl));
		entry.0 += 1;
		Ok(entry.0)
	}
}


// vim: ts=4

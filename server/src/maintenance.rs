//! Periodic housekeeping: rate-counter pruning and queue removal policies

use std::time::Duration;

use dripmail_types::queue_adapter::{CleanupPolicy, QueueAdapter};
use dripmail_types::store_adapter::StoreAdapter;

use crate::prelude::*;

const TICK: Duration = Duration::from_secs(3600);
const COUNTER_RETENTION_SECS: i64 = 24 * 3600;

pub fn start(app: &App) -> tokio::task::JoinHandle<()> {
	let app = app.clone();
	tokio::spawn(async move {
		loop {
			tokio::time::sleep(TICK).await;

			match app.store.prune_rate_counters(Timestamp::from_now(-COUNTER_RETENTION_SECS)).await
			{
				Ok(0) => {}
				Ok(n) => info!("pruned {} stale rate counter(s)", n),
				Err(err) => warn!("rate counter pruning failed: {}", err),
			}

			match app.queue.cleanup(&CleanupPolicy::default()).await {
				Ok(0) => {}
				Ok(n) => info!("queue cleanup removed {} job(s)", n),
				Err(err) => warn!("queue cleanup failed: {}", err),
			}
		}
	})
}

// vim: ts=4

//! Hourly rate limiter over global and per-sender counters
//!
//! Windows are fixed UTC calendar hours, not sliding. The fast path reads
//! the counter backend; when that errors, `check` falls back to counting
//! SENT rows in the current hour straight from the durable store.
//! Increments happen after a successful send, never before, so contention
//! can only over-count.

use std::sync::Arc;
use std::time::Duration;

use dripmail_types::store_adapter::StoreAdapter;

use crate::prelude::*;
use crate::rate_limit::CounterBackend;

/// Answer to "may I send now, and if not, when?"
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
	pub allowed: bool,
	pub remaining: u32,
	/// Start of the next UTC hour, when all counters reset
	pub reset_at: Timestamp,
	/// Now when allowed, otherwise `reset_at`
	pub next_slot_at: Timestamp,
}

pub struct RateLimiter {
	backend: Arc<dyn CounterBackend>,
	store: Arc<dyn StoreAdapter>,
	global_limit: u32,
	sender_limit: u32,
}

/// Fast-path key: `ratelimit:email:{global|sender:<id>}:YYYY-MM-DD-HH` (UTC)
fn fast_key(sender: Option<SenderId>, hour: Timestamp) -> String {
	let stamp = hour.to_datetime().format("%Y-%m-%d-%H");
	match sender {
		Some(id) => format!("ratelimit:email:sender:{}:{}", id, stamp),
		None => format!("ratelimit:email:global:{}", stamp),
	}
}

/// Durable key: `{global|sender:<id>}:<hourStartIso>`
fn durable_key(sender: Option<SenderId>, hour: Timestamp) -> String {
	match sender {
		Some(id) => format!("sender:{}:{}", id, hour.to_iso()),
		None => format!("global:{}", hour.to_iso()),
	}
}

impl RateLimiter {
	pub fn new(
		backend: Arc<dyn CounterBackend>,
		store: Arc<dyn StoreAdapter>,
		global_limit: u32,
		sender_limit: u32,
	) -> Arc<Self> {
		Arc::new(Self { backend, store, global_limit, sender_limit })
	}

	/// Count for a scope in the current hour: fast path, then store fallback
	async fn current_count(&self, sender: Option<SenderId>, hour: Timestamp) -> ClResult<u64> {
		match self.backend.get(&fast_key(sender, hour)).await {
			Ok(count) => Ok(count),
			Err(err) => {
				warn!("counter backend unavailable, falling back to store: {}", err);
				self.store.count_sent_in_window(sender, hour, hour.next_hour_start()).await
			}
		}
	}

	pub async fn check(&self, sender: Option<SenderId>) -> ClResult<RateLimitDecision> {
		let now = Timestamp::now();
		let hour = now.hour_start();
		let reset_at = now.next_hour_start();

		let global_count = self.current_count(None, hour).await?;
		let mut remaining =
			u64::from(self.global_limit).saturating_sub(global_count).min(u64::from(u32::MAX))
				as u32;

		if sender.is_some() {
			let sender_count = self.current_count(sender, hour).await?;
			let sender_remaining = u64::from(self.sender_limit)
				.saturating_sub(sender_count)
				.min(u64::from(u32::MAX)) as u32;
			remaining = remaining.min(sender_remaining);
		}

		let allowed = remaining > 0;
		Ok(RateLimitDecision {
			allowed,
			remaining,
			reset_at,
			next_slot_at: if allowed { now } else { reset_at },
		})
	}

	/// Bump the global and (when given) sender counters for the current
	/// hour. The fast path carries a TTL of seconds-to-next-hour + 60; the
	/// durable upsert is best-effort, a counter inflation being preferable
	/// to blocking sends.
	pub async fn increment(&self, sender: Option<SenderId>) -> ClResult<()> {
		let now = Timestamp::now();
		let hour = now.hour_start();
		let window_end = now.next_hour_start();
		let ttl = Duration::from_secs((window_end.0 - now.0).max(0) as u64 + 60);

		let mut scopes = vec![None];
		if sender.is_some() {
			scopes.push(sender);
		}
		for scope in scopes {
			if let Err(err) = self.backend.incr(&fast_key(scope, hour), ttl).await {
				warn!("fast-path counter increment failed: {}", err);
			}
			if let Err(err) =
				self.store.bump_rate_counter(&durable_key(scope, hour), hour, window_end).await
			{
				warn!("durable counter upsert failed: {}", err);
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rate_limit::InMemoryCounterBackend;
	use async_trait::async_trait;
	use dripmail_store_adapter_sqlite::StoreAdapterSqlite;
	use tempfile::TempDir;

	async fn test_store() -> (Arc<StoreAdapterSqlite>, TempDir) {
		let temp = TempDir::new().expect("tempdir");
		let store = StoreAdapterSqlite::new(temp.path()).await.expect("store");
		(Arc::new(store), temp)
	}

	#[tokio::test]
	async fn test_check_allows_under_limit() {
		let (store, _temp) = test_store().await;
		let limiter =
			RateLimiter::new(Arc::new(InMemoryCounterBackend::new()), store, 10, 5);

		let decision = limiter.check(Some(SenderId(1))).await.unwrap();
		assert!(decision.allowed);
		assert_eq!(decision.remaining, 5, "sender limit is the tighter bound");
		assert_eq!(decision.next_slot_at.hour_start(), Timestamp::now().hour_start());
	}

	#[tokio::test]
	async fn test_remaining_is_min_of_global_and_sender() {
		let (store, _temp) = test_store().await;
		let limiter =
			RateLimiter::new(Arc::new(InMemoryCounterBackend::new()), store, 3, 100);

		limiter.increment(Some(SenderId(1))).await.unwrap();
		limiter.increment(Some(SenderId(2))).await.unwrap();

		// Global counted both sends; sender 3 has none of its own
		let decision = limiter.check(Some(SenderId(3))).await.unwrap();
		assert!(decision.allowed);
		assert_eq!(decision.remaining, 1);
	}

	#[tokio::test]
	async fn test_denied_when_exhausted_with_next_slot_at_reset() {
		let (store, _temp) = test_store().await;
		let limiter =
			RateLimiter::new(Arc::new(InMemoryCounterBackend::new()), store, 2, 10);

		limiter.increment(None).await.unwrap();
		limiter.increment(None).await.unwrap();

		let decision = limiter.check(None).await.unwrap();
		assert!(!decision.allowed);
		assert_eq!(decision.remaining, 0);
		assert_eq!(decision.next_slot_at, decision.reset_at);
		assert_eq!(decision.reset_at, Timestamp::now().next_hour_start());
	}

	#[tokio::test]
	async fn test_fresh_sender_key_counts_as_zero() {
		let (store, _temp) = test_store().await;
		let limiter =
			RateLimiter::new(Arc::new(InMemoryCounterBackend::new()), store, 10, 10);

		// First send ever from this sender: no counter entry anywhere
		let decision = limiter.check(Some(SenderId(42))).await.unwrap();
		assert!(decision.allowed);
		assert_eq!(decision.remaining, 10);
	}

	/// Backend that always errors, forcing the durable fallback
	struct BrokenBackend;

	#[async_trait]
	impl CounterBackend for BrokenBackend {
		async fn get(&self, _key: &str) -> ClResult<u64> {
			Err(Error::Internal("counter backend down".into()))
		}

		async fn incr(&self, _key: &str, _ttl: Duration) -> ClResult<u64> {
			Err(Error::Internal("counter backend down".into()))
		}
	}

	#[tokio::test]
	async fn test_fallback_counts_sent_rows_from_store() {
		use dripmail_types::store_adapter::{
			CreateBatch, CreateMessage, CreateSender, StoreAdapter, UpsertUser,
		};

		let (store, _temp) = test_store().await;

		// Seed one SENT message in the current hour
		let user = store
			.upsert_user(&UpsertUser {
				external_id: "x-1",
				email: "a@example.com",
				name: "A",
				avatar_url: None,
			})
			.await
			.unwrap();
		let sender = store
			.create_sender(
				user.id,
				&CreateSender {
					email: "a@corp.com",
					name: "A",
					smtp_host: None,
					smtp_port: None,
					smtp_user: None,
					smtp_secret: None,
					is_default: true,
				},
			)
			.await
			.unwrap();
		let batch = store
			.create_batch(
				user.id,
				&CreateBatch {
					total_emails: 1,
					start_time: Timestamp::now(),
					delay_secs: 0,
					hourly_limit: 10,
				},
			)
			.await
			.unwrap();
		let msgs = store
			.create_messages(
				user.id,
				batch.id,
				&[CreateMessage {
					sender_id: Some(sender.id),
					recipient: "r@example.com",
					subject: "s",
					body: "b",
					scheduled_at: Timestamp::now(),
					batch_index: 0,
					max_retries: 3,
				}],
			)
			.await
			.unwrap();
		store.claim_message(msgs[0].id, "j1").await.unwrap();
		store.mark_sent(msgs[0].id, "provider-1", None).await.unwrap();

		let limiter = RateLimiter::new(Arc::new(BrokenBackend), store, 2, 2);
		let decision = limiter.check(Some(sender.id)).await.unwrap();
		assert!(decision.allowed);
		assert_eq!(decision.remaining, 1, "fallback must see the SENT row");
	}
}

// vim: ts=4

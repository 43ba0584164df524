//! End-to-end delivery pipeline tests: coordinator -> queue -> worker ->
//! transport over the real SQLite adapters, with a scripted transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use dripmail::email::coordinator::{Coordinator, CoordinatorOpts, ScheduleBatch, ScheduledBatch};
use dripmail::email::planner::HourBucket;
use dripmail::email::worker::{WorkerConfig, WorkerPool};
use dripmail::error::{ClResult, Error};
use dripmail::queue_adapter::QueueAdapter;
use dripmail::rate_limit::{InMemoryCounterBackend, RateLimiter};
use dripmail::store_adapter::{
	CreateSender, ListMessageOptions, MessageStats, StoreAdapter, UpsertUser,
};
use dripmail::transport_adapter::{Envelope, SendReceipt, SmtpConfig, TransportAdapter};
use dripmail::types::{MessageStatus, SenderId, Timestamp, UserId};
use dripmail_queue_adapter_sqlite::QueueAdapterSqlite;
use dripmail_store_adapter_sqlite::StoreAdapterSqlite;

/// Transport double: records deliveries, optionally failing the first N
/// send calls
#[derive(Default)]
struct MockTransport {
	delivered: Mutex<Vec<Box<str>>>,
	attempts: AtomicU32,
	fail_first: AtomicU32,
}

impl MockTransport {
	fn failing(times: u32) -> Self {
		Self { fail_first: AtomicU32::new(times), ..Self::default() }
	}

	fn delivered_count(&self) -> usize {
		self.delivered.lock().len()
	}

	fn attempt_count(&self) -> u32 {
		self.attempts.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl TransportAdapter for MockTransport {
	async fn send(
		&self,
		_config: Option<&SmtpConfig>,
		envelope: &Envelope,
	) -> ClResult<SendReceipt> {
		self.attempts.fetch_add(1, Ordering::SeqCst);
		if self
			.fail_first
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
		{
			return Err(Error::TransportFailure("mock transport outage".into()));
		}

		let mut delivered = self.delivered.lock();
		delivered.push(envelope.to.clone());
		Ok(SendReceipt {
			message_id: Some(format!("<mock-{}@test>", delivered.len()).into()),
			preview_url: None,
		})
	}

	async fn close(&self) {}
}

struct Pipeline {
	store: Arc<StoreAdapterSqlite>,
	queue: Arc<QueueAdapterSqlite>,
	transport: Arc<MockTransport>,
	limiter: Arc<RateLimiter>,
	coordinator: Coordinator,
	user_id: UserId,
	sender_id: SenderId,
	max_retries: u32,
	concurrency: usize,
	_temp: TempDir,
}

impl Pipeline {
	async fn new(
		transport: MockTransport,
		global_limit: u32,
		sender_limit: u32,
		max_retries: u32,
		concurrency: usize,
	) -> Pipeline {
		let temp = TempDir::new().expect("tempdir");
		let store = Arc::new(StoreAdapterSqlite::new(temp.path()).await.expect("store"));
		let queue = Arc::new(QueueAdapterSqlite::new(temp.path()).await.expect("queue"));
		let transport = Arc::new(transport);

		let store_dyn: Arc<dyn StoreAdapter> = store.clone();
		let limiter = RateLimiter::new(
			Arc::new(InMemoryCounterBackend::new()),
			store_dyn.clone(),
			global_limit,
			sender_limit,
		);
		let coordinator = Coordinator::new(
			store_dyn,
			queue.clone(),
			CoordinatorOpts {
				max_retries,
				initial_backoff: Duration::from_millis(50),
				hour_bucket: HourBucket::Utc,
			},
		);

		let user = store
			.upsert_user(&UpsertUser {
				external_id: "google-1",
				email: "alice@example.com",
				name: "Alice",
				avatar_url: None,
			})
			.await
			.expect("user");
		let sender = store
			.create_sender(
				user.id,
				&CreateSender {
					email: "alice@corp.com",
					name: "Alice",
					smtp_host: None,
					smtp_port: None,
					smtp_user: None,
					smtp_secret: None,
					is_default: true,
				},
			)
			.await
			.expect("sender");

		Pipeline {
			store,
			queue,
			transport,
			limiter,
			coordinator,
			user_id: user.id,
			sender_id: sender.id,
			max_retries,
			concurrency,
			_temp: temp,
		}
	}

	fn start_worker(&self) -> Arc<WorkerPool> {
		let store: Arc<dyn StoreAdapter> = self.store.clone();
		let queue: Arc<dyn QueueAdapter> = self.queue.clone();
		let transport: Arc<dyn TransportAdapter> = self.transport.clone();
		WorkerPool::start(
			store,
			queue,
			self.limiter.clone(),
			transport,
			WorkerConfig {
				concurrency: self.concurrency,
				poll_interval: Duration::from_millis(50),
				lease: Duration::from_secs(5),
				max_retries: self.max_retries,
				initial_backoff: Duration::from_millis(50),
				default_smtp: None,
			},
		)
	}

	async fn schedule(&self, recipients: &[&str], hourly_limit: u32) -> ScheduledBatch {
		self.coordinator
			.schedule_batch(
				self.user_id,
				&ScheduleBatch {
					subject: "hello".into(),
					body: "<p>hi there</p>".into(),
					recipients: recipients.iter().map(|r| (*r).to_string()).collect(),
					start_time: Timestamp::now(),
					delay_secs: 0,
					hourly_limit,
					sender_id: None,
				},
			)
			.await
			.expect("schedule")
	}

	async fn wait_for_stats(&self, pred: impl Fn(&MessageStats) -> bool) -> MessageStats {
		let deadline = std::time::Instant::now() + Duration::from_secs(15);
		loop {
			let stats = self.store.message_stats(self.user_id).await.expect("stats");
			if pred(&stats) {
				return stats;
			}
			assert!(
				std::time::Instant::now() < deadline,
				"timed out waiting for stats; last: {:?}",
				stats
			);
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
	}

	async fn wait_for_queue_drained(&self) {
		let deadline = std::time::Instant::now() + Duration::from_secs(15);
		loop {
			if self.queue.pending_count().await.expect("pending") == 0 {
				return;
			}
			assert!(std::time::Instant::now() < deadline, "queue never drained");
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_delivers_all_messages_exactly_once() {
	let p = Pipeline::new(MockTransport::default(), 100, 100, 3, 2).await;
	let worker = p.start_worker();

	let scheduled = p.schedule(&["a@x.com", "b@x.com", "c@x.com"], 100).await;
	assert_eq!(scheduled.messages.len(), 3);
	assert!(scheduled.messages.iter().all(|m| m.job_id.is_some()));

	let stats = p.wait_for_stats(|s| s.sent == 3).await;
	assert_eq!(stats.failed, 0);
	assert_eq!(stats.total, 3);

	// At most once: one transport call per message, distinct provider ids
	assert_eq!(p.transport.attempt_count(), 3);
	assert_eq!(p.transport.delivered_count(), 3);
	let mut provider_ids = Vec::new();
	for msg in &scheduled.messages {
		let msg = p.store.read_message(p.user_id, msg.id).await.unwrap();
		assert_eq!(msg.status, MessageStatus::Sent);
		assert!(msg.sent_at.is_some());
		provider_ids.push(msg.provider_message_id.expect("provider id"));
	}
	provider_ids.sort();
	provider_ids.dedup();
	assert_eq!(provider_ids.len(), 3);

	let batch = p.store.read_batch(p.user_id, scheduled.batch.id).await.unwrap();
	assert_eq!(batch.sent_emails, 3);
	assert_eq!(batch.failed_emails, 0);

	p.wait_for_queue_drained().await;
	worker.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_global_cap_defers_excess_to_next_hour() {
	// Single worker so the check-increment sequence is serialized
	let p = Pipeline::new(MockTransport::default(), 2, 10, 3, 1).await;
	let worker = p.start_worker();

	p.schedule(&["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"], 100).await;

	// Two go out this hour; three are deferred and land back in SCHEDULED
	let stats = p.wait_for_stats(|s| s.sent == 2 && s.scheduled == 3).await;
	assert_eq!(stats.failed, 0, "rate limiting must never fail a message");
	assert_eq!(p.transport.delivered_count(), 2);

	let (deferred, _) = p
		.store
		.list_messages(
			p.user_id,
			&ListMessageOptions {
				statuses: Some(vec![MessageStatus::Scheduled]),
				page: 1,
				limit: 10,
				..ListMessageOptions::default()
			},
		)
		.await
		.unwrap();
	assert_eq!(deferred.len(), 3);
	for msg in &deferred {
		// Rescheduled onto an hour boundary in the future, as a fresh
		// attempt, without touching the retry budget
		assert_eq!(msg.scheduled_at.0 % 3600, 0);
		assert!(msg.scheduled_at > Timestamp::now().hour_start());
		assert!(msg.job_id.as_deref().is_some_and(|id| id.ends_with("-attempt-2")));
		assert_eq!(msg.retry_count, 0);
	}

	// The deferral jobs are waiting in the queue for the next hour
	assert_eq!(p.queue.pending_count().await.unwrap(), 3);
	worker.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transient_failures_retry_until_success() {
	let p = Pipeline::new(MockTransport::failing(2), 100, 100, 3, 2).await;
	let worker = p.start_worker();

	let scheduled = p.schedule(&["a@x.com"], 100).await;

	let stats = p.wait_for_stats(|s| s.sent == 1).await;
	assert_eq!(stats.failed, 0);
	assert_eq!(p.transport.attempt_count(), 3, "two failures then one success");

	let msg = p.store.read_message(p.user_id, scheduled.messages[0].id).await.unwrap();
	assert_eq!(msg.status, MessageStatus::Sent);
	assert_eq!(msg.retry_count, 2);

	worker.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_exhaustion_marks_failed() {
	let p = Pipeline::new(MockTransport::failing(u32::MAX), 100, 100, 2, 2).await;
	let worker = p.start_worker();

	let scheduled = p.schedule(&["a@x.com"], 100).await;

	let stats = p.wait_for_stats(|s| s.failed == 1).await;
	assert_eq!(stats.sent, 0);
	assert_eq!(p.transport.attempt_count(), 2, "max_retries bounds the attempts");

	let msg = p.store.read_message(p.user_id, scheduled.messages[0].id).await.unwrap();
	assert_eq!(msg.status, MessageStatus::Failed);
	assert!(msg.retry_count >= msg.max_retries);
	assert!(
		msg.error_message.as_deref().is_some_and(|e| e.contains("mock transport outage")),
		"terminal error must carry the last failure"
	);

	let batch = p.store.read_batch(p.user_id, scheduled.batch.id).await.unwrap();
	assert_eq!(batch.failed_emails, 1);

	// Terminal: no further queue activity
	p.wait_for_queue_drained().await;
	let before = p.transport.attempt_count();
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(p.transport.attempt_count(), before);

	worker.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_message_is_dropped_without_transport_call() {
	let p = Pipeline::new(MockTransport::default(), 100, 100, 3, 2).await;

	// Scheduled into the future, cancelled before the worker ever runs
	let scheduled = p
		.coordinator
		.schedule_batch(
			p.user_id,
			&ScheduleBatch {
				subject: "hello".into(),
				body: "<p>hi</p>".into(),
				recipients: vec!["a@x.com".into()],
				start_time: Timestamp::from_now(1),
				delay_secs: 0,
				hourly_limit: 100,
				sender_id: None,
			},
		)
		.await
		.unwrap();
	p.store.delete_message(p.user_id, scheduled.messages[0].id).await.unwrap();

	let worker = p.start_worker();

	// The job still fires, finds no row, and acknowledges
	p.wait_for_queue_drained().await;
	assert_eq!(p.transport.attempt_count(), 0, "cancelled messages never reach the transport");

	worker.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_processing_row_from_crashed_worker_is_retaken() {
	let p = Pipeline::new(MockTransport::default(), 100, 100, 3, 2).await;

	let scheduled = p.schedule(&["a@x.com"], 100).await;
	let message_id = scheduled.messages[0].id;

	// Simulate a worker that died mid-send: the row is PROCESSING and the
	// queue job was never acknowledged
	p.store.claim_message(message_id, "email-crashed-attempt-1").await.unwrap();

	let worker = p.start_worker();
	let stats = p.wait_for_stats(|s| s.sent == 1).await;
	assert_eq!(stats.processing, 0);
	assert_eq!(p.transport.delivered_count(), 1);

	worker.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sender_scoped_cap_applies_per_sender() {
	let p = Pipeline::new(MockTransport::default(), 100, 1, 3, 1).await;
	let worker = p.start_worker();

	p.schedule(&["a@x.com", "b@x.com"], 100).await;

	let stats = p.wait_for_stats(|s| s.sent == 1 && s.scheduled == 1).await;
	assert_eq!(stats.failed, 0);
	assert_eq!(p.transport.delivered_count(), 1);

	// The durable counter rows exist for both scopes
	let hour = Timestamp::now().hour_start();
	let sent_this_hour = p
		.store
		.count_sent_in_window(Some(p.sender_id), hour, hour.next_hour_start())
		.await
		.unwrap();
	assert_eq!(sent_this_hour, 1);

	worker.shutdown(Duration::from_secs(5)).await;
}

// vim: ts=4

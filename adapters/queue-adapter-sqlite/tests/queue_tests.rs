//! Queue adapter behaviour tests: idempotent enqueue, delayed visibility,
//! priority tie-breaks, lease redelivery, backoff, and removal policies.

use std::time::Duration;

use dripmail::queue_adapter::{
	CleanupPolicy, EnqueueOptions, EnqueueOutcome, FailOutcome, QueueAdapter, SendJob,
	ThroughputCap,
};
use dripmail::types::{BatchId, MessageId, SenderId, UserId};
use dripmail_queue_adapter_sqlite::QueueAdapterSqlite;
use tempfile::TempDir;

async fn create_test_queue() -> (QueueAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let queue = QueueAdapterSqlite::new(temp_dir.path()).await.expect("Failed to create queue");
	(queue, temp_dir)
}

fn job(message_id: i64, attempt: u32) -> SendJob {
	SendJob {
		message_id: MessageId(message_id),
		user_id: UserId(1),
		batch_id: BatchId(1),
		sender_id: Some(SenderId(1)),
		recipient: "someone@example.com".into(),
		subject: "hello".into(),
		body: "<p>hi</p>".into(),
		attempt,
	}
}

fn opts() -> EnqueueOptions {
	EnqueueOptions {
		delay: Duration::ZERO,
		priority: 0,
		max_attempts: 3,
		initial_backoff: Duration::from_millis(100),
	}
}

#[tokio::test]
async fn test_enqueue_is_idempotent_per_attempt() {
	let (queue, _temp) = create_test_queue().await;

	let first = queue.enqueue(&job(1, 1), &opts()).await.unwrap();
	assert!(matches!(first, EnqueueOutcome::Enqueued(ref id) if &**id == "email-1-attempt-1"));

	let second = queue.enqueue(&job(1, 1), &opts()).await.unwrap();
	assert_eq!(second, EnqueueOutcome::Duplicate);

	// A different attempt is a distinct job
	let third = queue.enqueue(&job(1, 2), &opts()).await.unwrap();
	assert!(matches!(third, EnqueueOutcome::Enqueued(_)));

	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert_eq!(leased.len(), 2);
}

#[tokio::test]
async fn test_delayed_visibility() {
	let (queue, _temp) = create_test_queue().await;

	let delayed = EnqueueOptions { delay: Duration::from_millis(300), ..opts() };
	queue.enqueue(&job(1, 1), &delayed).await.unwrap();

	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert!(leased.is_empty(), "job must stay invisible until its delay passes");

	tokio::time::sleep(Duration::from_millis(400)).await;
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert_eq!(leased.len(), 1);
	assert_eq!(leased[0].job.message_id, MessageId(1));
	assert_eq!(leased[0].delivery, 1);
}

#[tokio::test]
async fn test_priority_breaks_ties_smaller_first() {
	let (queue, _temp) = create_test_queue().await;

	// Bulk enqueue shares one reference instant, so these three land on the
	// same visibility instant and only priority orders them
	let items = vec![
		(job(1, 1), EnqueueOptions { priority: 2, ..opts() }),
		(job(2, 1), EnqueueOptions { priority: 0, ..opts() }),
		(job(3, 1), EnqueueOptions { priority: 1, ..opts() }),
	];
	queue.enqueue_bulk(&items).await.unwrap();

	tokio::time::sleep(Duration::from_millis(50)).await;
	let ids: Vec<i64> = queue
		.dequeue(10, Duration::from_secs(30))
		.await
		.unwrap()
		.iter()
		.map(|l| l.job.message_id.0)
		.collect();
	assert_eq!(ids, vec![2, 3, 1]);
}

#[tokio::test]
async fn test_lease_expiry_redelivers() {
	let (queue, _temp) = create_test_queue().await;

	queue.enqueue(&job(1, 1), &opts()).await.unwrap();

	let leased = queue.dequeue(10, Duration::from_millis(200)).await.unwrap();
	assert_eq!(leased.len(), 1);
	assert_eq!(leased[0].delivery, 1);

	// Lease still held: nothing to deliver
	let leased = queue.dequeue(10, Duration::from_millis(200)).await.unwrap();
	assert!(leased.is_empty());

	// Worker "crashed"; lease expires and the job comes back
	tokio::time::sleep(Duration::from_millis(300)).await;
	let leased = queue.dequeue(10, Duration::from_millis(200)).await.unwrap();
	assert_eq!(leased.len(), 1);
	assert_eq!(leased[0].delivery, 2);
}

#[tokio::test]
async fn test_complete_acknowledges() {
	let (queue, _temp) = create_test_queue().await;

	queue.enqueue(&job(1, 1), &opts()).await.unwrap();
	let leased = queue.dequeue(10, Duration::from_millis(100)).await.unwrap();
	queue.complete(&leased[0].job_id).await.unwrap();

	tokio::time::sleep(Duration::from_millis(200)).await;
	let leased = queue.dequeue(10, Duration::from_millis(100)).await.unwrap();
	assert!(leased.is_empty(), "completed jobs must not be redelivered");
	assert_eq!(queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fail_applies_exponential_backoff_then_parks() {
	let (queue, _temp) = create_test_queue().await;

	queue.enqueue(&job(1, 1), &opts()).await.unwrap();

	// Delivery 1 fails: retry after ~100ms
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	let outcome = queue.fail(&leased[0].job_id, "smtp timeout").await.unwrap();
	let FailOutcome::Retrying { delay } = outcome else {
		panic!("expected first failure to retry")
	};
	assert_eq!(delay, Duration::from_millis(100));

	assert!(queue.dequeue(10, Duration::from_secs(30)).await.unwrap().is_empty());
	tokio::time::sleep(Duration::from_millis(150)).await;

	// Delivery 2 fails: retry after ~200ms
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert_eq!(leased.len(), 1);
	assert_eq!(leased[0].delivery, 2);
	let outcome = queue.fail(&leased[0].job_id, "smtp timeout").await.unwrap();
	let FailOutcome::Retrying { delay } = outcome else {
		panic!("expected second failure to retry")
	};
	assert_eq!(delay, Duration::from_millis(200));

	tokio::time::sleep(Duration::from_millis(250)).await;

	// Delivery 3 fails: budget exhausted
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert_eq!(leased[0].delivery, 3);
	let outcome = queue.fail(&leased[0].job_id, "smtp timeout").await.unwrap();
	assert_eq!(outcome, FailOutcome::Parked);

	tokio::time::sleep(Duration::from_millis(250)).await;
	assert!(queue.dequeue(10, Duration::from_secs(30)).await.unwrap().is_empty());
	assert_eq!(queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_bulk_enqueue_reports_duplicates_in_order() {
	let (queue, _temp) = create_test_queue().await;

	queue.enqueue(&job(2, 1), &opts()).await.unwrap();

	let items =
		vec![(job(1, 1), opts()), (job(2, 1), opts()), (job(3, 1), opts())];
	let outcomes = queue.enqueue_bulk(&items).await.unwrap();

	assert_eq!(outcomes.len(), 3);
	assert!(matches!(outcomes[0], EnqueueOutcome::Enqueued(_)));
	assert_eq!(outcomes[1], EnqueueOutcome::Duplicate);
	assert!(matches!(outcomes[2], EnqueueOutcome::Enqueued(_)));
	assert_eq!(queue.pending_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_cleanup_removes_old_completed_and_failed() {
	let (queue, _temp) = create_test_queue().await;

	queue.enqueue(&job(1, 1), &opts()).await.unwrap();
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	queue.complete(&leased[0].job_id).await.unwrap();

	queue
		.enqueue(&job(2, 1), &EnqueueOptions { max_attempts: 1, ..opts() })
		.await
		.unwrap();
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert_eq!(queue.fail(&leased[0].job_id, "boom").await.unwrap(), FailOutcome::Parked);

	// Zero retention wipes both terminal states
	let policy = CleanupPolicy {
		keep_completed: Duration::ZERO,
		keep_completed_max: 0,
		keep_failed: Duration::ZERO,
	};
	tokio::time::sleep(Duration::from_millis(50)).await;
	let removed = queue.cleanup(&policy).await.unwrap();
	assert_eq!(removed, 2);
}

#[tokio::test]
async fn test_cleanup_keeps_recent_within_policy() {
	let (queue, _temp) = create_test_queue().await;

	queue.enqueue(&job(1, 1), &opts()).await.unwrap();
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	queue.complete(&leased[0].job_id).await.unwrap();

	let removed = queue.cleanup(&CleanupPolicy::default()).await.unwrap();
	assert_eq!(removed, 0, "fresh completed jobs stay within the 24h window");
}

#[tokio::test]
async fn test_throughput_cap_limits_dequeue_window() {
	let (queue, temp) = create_test_queue().await;
	drop(queue);
	let queue = QueueAdapterSqlite::new(temp.path())
		.await
		.unwrap()
		.with_throughput_cap(ThroughputCap { max: 2, window: Duration::from_secs(60) });

	for i in 1..=5 {
		queue.enqueue(&job(i, 1), &opts()).await.unwrap();
	}

	let first = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert_eq!(first.len(), 2, "cap bounds one window's deliveries");
	let second = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert!(second.is_empty(), "window budget exhausted");
}

#[tokio::test]
async fn test_queue_survives_reopen() {
	let temp = TempDir::new().unwrap();
	{
		let queue = QueueAdapterSqlite::new(temp.path()).await.unwrap();
		queue.enqueue(&job(7, 1), &opts()).await.unwrap();
	}

	// "Restart": a fresh adapter over the same file still has the job
	let queue = QueueAdapterSqlite::new(temp.path()).await.unwrap();
	let leased = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
	assert_eq!(leased.len(), 1);
	assert_eq!(leased[0].job.message_id, MessageId(7));
}

// vim: ts=4

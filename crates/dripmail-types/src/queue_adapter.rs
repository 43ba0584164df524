//! Adapter contract for the persistent delayed job queue.
//!
//! The queue stores send jobs with delayed visibility, priority tie-breaks,
//! lease-based delivery, and deterministic de-duplicated job ids. It must
//! survive process restarts; everything a worker needs to act on a job is in
//! the serialized payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::prelude::*;

/// Queue payload: one attempt to send one message.
///
/// `attempt` participates in the job identity, so re-enqueueing the same
/// `(message, attempt)` pair is rejected as a duplicate while a quota
/// deferral (attempt + 1) is a distinct job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendJob {
	pub message_id: MessageId,
	pub user_id: UserId,
	pub batch_id: BatchId,
	pub sender_id: Option<SenderId>,
	pub recipient: Box<str>,
	pub subject: Box<str>,
	pub body: Box<str>,
	/// 1-based attempt number
	pub attempt: u32,
}

impl SendJob {
	/// Deterministic queue identity for this attempt
	pub fn job_id(&self) -> String {
		format!("email-{}-attempt-{}", self.message_id, self.attempt)
	}

	/// The same work item, re-issued as the next attempt (quota deferral)
	pub fn next_attempt(&self) -> SendJob {
		SendJob { attempt: self.attempt + 1, ..self.clone() }
	}
}

/// Per-job enqueue parameters
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
	/// Visibility delay from now
	pub delay: Duration,
	/// Smaller = delivered first among jobs due at the same instant
	pub priority: i32,
	/// Delivery attempts before the queue parks the job as failed
	pub max_attempts: u32,
	/// First retry backoff; doubles per delivery
	pub initial_backoff: Duration,
}

impl Default for EnqueueOptions {
	fn default() -> Self {
		Self {
			delay: Duration::ZERO,
			priority: 0,
			max_attempts: 3,
			initial_backoff: Duration::from_secs(60),
		}
	}
}

/// Result of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
	Enqueued(Box<str>),
	/// A job with the same deterministic id already exists
	Duplicate,
}

impl EnqueueOutcome {
	pub fn job_id(&self) -> Option<&str> {
		match self {
			EnqueueOutcome::Enqueued(id) => Some(id),
			EnqueueOutcome::Duplicate => None,
		}
	}
}

/// A job handed to a worker under a lease
#[derive(Debug, Clone)]
pub struct LeasedJob {
	pub job_id: Box<str>,
	pub job: SendJob,
	/// How many times the queue has delivered this job (1-based)
	pub delivery: u32,
}

/// Result of failing a job back to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
	/// Redelivery scheduled after exponential backoff
	Retrying { delay: Duration },
	/// Delivery budget exhausted; job parked as failed
	Parked,
}

/// Removal policy applied by the maintenance pass
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
	pub keep_completed: Duration,
	pub keep_completed_max: u64,
	pub keep_failed: Duration,
}

impl Default for CleanupPolicy {
	fn default() -> Self {
		Self {
			keep_completed: Duration::from_secs(24 * 3600),
			keep_completed_max: 1000,
			keep_failed: Duration::from_secs(7 * 24 * 3600),
		}
	}
}

/// Optional per-queue throughput ceiling, a second line of defence under
/// the rate limiter's hourly caps
#[derive(Debug, Clone, Copy)]
pub struct ThroughputCap {
	pub max: u32,
	pub window: Duration,
}

#[async_trait]
pub trait QueueAdapter: Send + Sync {
	/// Insert one job. A duplicate deterministic id is an outcome, not an
	/// error.
	async fn enqueue(&self, job: &SendJob, opts: &EnqueueOptions) -> ClResult<EnqueueOutcome>;

	/// Insert many jobs in one transaction, preserving order
	async fn enqueue_bulk(
		&self,
		items: &[(SendJob, EnqueueOptions)],
	) -> ClResult<Vec<EnqueueOutcome>>;

	/// Claim up to `max` due jobs under a lease. Jobs whose lease expired
	/// are redelivered here. Ordering: visibility instant, then priority
	/// (smaller first), then insertion order.
	async fn dequeue(&self, max: usize, lease: Duration) -> ClResult<Vec<LeasedJob>>;

	/// Acknowledge successful processing (including completed-with-deferral)
	async fn complete(&self, job_id: &str) -> ClResult<()>;

	/// Return a failed job; the queue reschedules with exponential backoff
	/// until the delivery budget is exhausted.
	async fn fail(&self, job_id: &str, error: &str) -> ClResult<FailOutcome>;

	/// Apply removal policies; returns the number of rows deleted
	async fn cleanup(&self, policy: &CleanupPolicy) -> ClResult<u64>;

	/// Jobs waiting or in flight (observability)
	async fn pending_count(&self) -> ClResult<u64>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_job_id_format() {
		let job = SendJob {
			message_id: MessageId(42),
			user_id: UserId(1),
			batch_id: BatchId(7),
			sender_id: None,
			recipient: "a@x".into(),
			subject: "s".into(),
			body: "b".into(),
			attempt: 1,
		};
		assert_eq!(job.job_id(), "email-42-attempt-1");
		assert_eq!(job.next_attempt().job_id(), "email-42-attempt-2");
	}
}

// vim: ts=4

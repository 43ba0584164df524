//! Scheduling coordinator: the write path from a schedule request to
//! persisted messages and enqueued delivery jobs
//!
//! Ordering is load-bearing: batch row, then message rows, then queue jobs,
//! then best-effort job-id links. Every message is durable before its job
//! could possibly fire, and an enqueue failure after the rows committed
//! marks the whole batch FAILED so no SCHEDULED row is left orphaned.

use std::sync::Arc;
use std::time::Duration;

use dripmail_types::queue_adapter::{EnqueueOptions, EnqueueOutcome, QueueAdapter, SendJob};
use dripmail_types::store_adapter::{
	Batch, CreateBatch, CreateMessage, Message, Sender, StoreAdapter,
};

use crate::email::planner::{self, HourBucket};
use crate::prelude::*;

/// A validated schedule request, as handed over by the HTTP edge
#[derive(Debug, Clone)]
pub struct ScheduleBatch {
	pub subject: String,
	pub body: String,
	pub recipients: Vec<String>,
	pub start_time: Timestamp,
	pub delay_secs: u32,
	pub hourly_limit: u32,
	pub sender_id: Option<SenderId>,
}

/// The committed batch with its scheduled messages
#[derive(Debug)]
pub struct ScheduledBatch {
	pub batch: Batch,
	pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOpts {
	pub max_retries: u32,
	pub initial_backoff: Duration,
	pub hour_bucket: HourBucket,
}

pub struct Coordinator {
	store: Arc<dyn StoreAdapter>,
	queue: Arc<dyn QueueAdapter>,
	opts: CoordinatorOpts,
}

impl Coordinator {
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		queue: Arc<dyn QueueAdapter>,
		opts: CoordinatorOpts,
	) -> Self {
		Self { store, queue, opts }
	}

	/// Explicit sender id must exist, belong to the user, and be active;
	/// otherwise fall back to the default active sender, then any active one.
	async fn resolve_sender(
		&self,
		user_id: UserId,
		requested: Option<SenderId>,
	) -> ClResult<Sender> {
		if let Some(sender_id) = requested {
			let sender = match self.store.read_sender(user_id, sender_id).await {
				Ok(sender) => sender,
				Err(Error::NotFound) => {
					return Err(Error::Validation("invalid sender".into()));
				}
				Err(err) => return Err(err),
			};
			if !sender.is_active {
				return Err(Error::Validation("sender is not active".into()));
			}
			return Ok(sender);
		}

		if let Some(sender) = self.store.default_sender(user_id).await? {
			return Ok(sender);
		}
		if let Some(sender) = self.store.any_active_sender(user_id).await? {
			return Ok(sender);
		}
		Err(Error::Validation("no active sender configured".into()))
	}

	pub async fn schedule_batch(
		&self,
		user_id: UserId,
		req: &ScheduleBatch,
	) -> ClResult<ScheduledBatch> {
		let sender = self.resolve_sender(user_id, req.sender_id).await?;

		let instants = planner::plan(
			req.recipients.len(),
			req.start_time,
			req.delay_secs,
			req.hourly_limit,
			self.opts.hour_bucket,
		);

		let batch = self
			.store
			.create_batch(
				user_id,
				&CreateBatch {
					total_emails: req.recipients.len() as u32,
					start_time: req.start_time,
					delay_secs: req.delay_secs,
					hourly_limit: req.hourly_limit,
				},
			)
			.await?;

		let creates: Vec<CreateMessage<'_>> = req
			.recipients
			.iter()
			.zip(&instants)
			.enumerate()
			.map(|(index, (recipient, scheduled_at))| CreateMessage {
				sender_id: Some(sender.id),
				recipient,
				subject: &req.subject,
				body: &req.body,
				scheduled_at: *scheduled_at,
				batch_index: index as u32,
				max_retries: self.opts.max_retries,
			})
			.collect();
		let mut messages = self.store.create_messages(user_id, batch.id, &creates).await?;

		let now = Timestamp::now();
		let items: Vec<(SendJob, EnqueueOptions)> = messages
			.iter()
			.map(|msg| {
				let job = SendJob {
					message_id: msg.id,
					user_id,
					batch_id: batch.id,
					sender_id: msg.sender_id,
					recipient: msg.recipient.clone(),
					subject: msg.subject.clone(),
					body: msg.body.clone(),
					attempt: 1,
				};
				let opts = EnqueueOptions {
					delay: Duration::from_secs((msg.scheduled_at.0 - now.0).max(0) as u64),
					priority: msg.batch_index as i32,
					// One extra queue delivery beyond the retry budget, so
					// the queue can never park a still-retryable message
					max_attempts: self.opts.max_retries + 1,
					initial_backoff: self.opts.initial_backoff,
				};
				(job, opts)
			})
			.collect();

		let outcomes = match self.queue.enqueue_bulk(&items).await {
			Ok(outcomes) => outcomes,
			Err(err) => {
				error!("batch {} enqueue failed after commit: {}", batch.id, err);
				let reason = format!("failed to enqueue delivery job: {}", err);
				if let Err(mark_err) = self.store.mark_batch_failed(batch.id, &reason).await {
					error!("could not mark batch {} failed: {}", batch.id, mark_err);
				}
				return Err(err);
			}
		};

		// Job ids are observability, not correctness; linking is best-effort
		for (msg, outcome) in messages.iter_mut().zip(&outcomes) {
			if let EnqueueOutcome::Enqueued(job_id) = outcome {
				if let Err(err) = self.store.link_job_id(msg.id, job_id).await {
					warn!("could not link job id to message {}: {}", msg.id, err);
				} else {
					msg.job_id = Some(job_id.clone());
				}
			}
		}

		info!(
			"scheduled batch {} for user {}: {} messages starting {}",
			batch.id,
			user_id,
			messages.len(),
			req.start_time.to_iso()
		);

		Ok(ScheduledBatch { batch, messages })
	}
}

// vim: ts=4

//! Worker pool: bounded-concurrency consumer of the persistent queue
//!
//! A dispatcher task polls the queue and feeds leased jobs through a bounded
//! channel to `concurrency` worker tasks. Each job runs the send state
//! machine: claim the message, consult the rate limiter, deliver through the
//! transport, and mutate durable state. Quota denials are deferrals (fresh
//! job, attempt + 1), not failures, so they never interact with the
//! exponential-backoff retry budget.

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use dripmail_types::queue_adapter::{EnqueueOptions, FailOutcome, LeasedJob, QueueAdapter};
use dripmail_types::store_adapter::{ClaimOutcome, Message, StoreAdapter};
use dripmail_types::transport_adapter::{Envelope, SmtpConfig, TransportAdapter};

use crate::email::html::html_to_text;
use crate::prelude::*;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
	/// Concurrent in-flight sends per process
	pub concurrency: usize,
	/// Queue poll interval when idle
	pub poll_interval: Duration,
	/// Queue lease per delivery; must exceed the slowest send
	pub lease: Duration,
	pub max_retries: u32,
	pub initial_backoff: Duration,
	/// Process-wide relay used by senders without private SMTP settings
	pub default_smtp: Option<SmtpConfig>,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			concurrency: 5,
			poll_interval: Duration::from_millis(500),
			lease: Duration::from_secs(60),
			max_retries: 3,
			initial_backoff: Duration::from_secs(60),
			default_smtp: None,
		}
	}
}

/// In-place retries for recording a confirmed send before giving up
const SENT_CONFIRM_ATTEMPTS: u32 = 5;

/// What to do with the queue job after processing
enum Verdict {
	/// Acknowledge: sent, terminal failure, deferral, or dropped
	Done,
	/// Hand back to the queue for backoff redelivery
	Retry(String),
}

pub struct WorkerPool {
	store: Arc<dyn StoreAdapter>,
	queue: Arc<dyn QueueAdapter>,
	limiter: Arc<RateLimiter>,
	transport: Arc<dyn TransportAdapter>,
	config: WorkerConfig,
	shutdown: watch::Sender<bool>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
	pub fn start(
		store: Arc<dyn StoreAdapter>,
		queue: Arc<dyn QueueAdapter>,
		limiter: Arc<RateLimiter>,
		transport: Arc<dyn TransportAdapter>,
		config: WorkerConfig,
	) -> Arc<Self> {
		let (shutdown, _) = watch::channel(false);
		let pool = Arc::new(Self {
			store,
			queue,
			limiter,
			transport,
			config,
			shutdown,
			handles: Mutex::new(Vec::new()),
		});

		let concurrency = pool.config.concurrency.max(1);
		let (tx, rx) = flume::bounded::<LeasedJob>(concurrency * 2);

		let mut handles = Vec::with_capacity(concurrency + 1);
		for worker_id in 0..concurrency {
			let pool = Arc::clone(&pool);
			let rx: Receiver<LeasedJob> = rx.clone();
			handles.push(tokio::spawn(async move {
				while let Ok(leased) = rx.recv_async().await {
					pool.handle_job(leased).await;
				}
				debug!("worker {} stopped", worker_id);
			}));
		}
		{
			let pool = Arc::clone(&pool);
			handles.push(tokio::spawn(async move { pool.dispatch(tx).await }));
		}
		*pool.handles.lock() = handles;

		info!("worker pool started with concurrency {}", concurrency);
		pool
	}

	/// Stop dequeuing, wait out in-flight sends up to `grace`, then close
	/// the transport. Overrunning sends stay PROCESSING and are retaken
	/// when their queue lease expires.
	pub async fn shutdown(&self, grace: Duration) {
		// send_replace: the flag must stick even if the dispatcher has not
		// subscribed yet
		self.shutdown.send_replace(true);
		let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
		if tokio::time::timeout(grace, futures::future::join_all(handles)).await.is_err() {
			warn!("shutdown grace period elapsed; abandoning in-flight sends");
		}
		self.transport.close().await;
		info!("worker pool stopped");
	}

	/// Poll loop: claim due jobs under a lease and push them to the workers.
	/// Dropping `tx` on shutdown lets workers drain the channel and exit.
	async fn dispatch(&self, tx: Sender<LeasedJob>) {
		let mut shutdown_rx = self.shutdown.subscribe();
		let batch = self.config.concurrency.max(1) * 2;

		loop {
			if *shutdown_rx.borrow() {
				break;
			}

			let mut saturated = false;
			match self.queue.dequeue(batch, self.config.lease).await {
				Ok(jobs) if !jobs.is_empty() => {
					saturated = jobs.len() == batch;
					for job in jobs {
						if tx.send_async(job).await.is_err() {
							return;
						}
					}
				}
				Ok(_) => {}
				Err(err) => {
					warn!("queue poll failed: {}", err);
				}
			}

			if !saturated {
				tokio::select! {
					() = tokio::time::sleep(self.config.poll_interval) => {}
					_ = shutdown_rx.changed() => {}
				}
			}
		}
	}

	async fn handle_job(&self, leased: LeasedJob) {
		match self.process(&leased).await {
			Ok(Verdict::Done) => {
				if let Err(err) = self.queue.complete(&leased.job_id).await {
					warn!("could not ack job {}: {}", leased.job_id, err);
				}
			}
			Ok(Verdict::Retry(reason)) => self.return_to_queue(&leased, &reason).await,
			// Store or queue outage: hand the job back; the message row was
			// either untouched or left PROCESSING, and claim accepts both
			Err(err) => {
				warn!("job {} hit infrastructure error: {}", leased.job_id, err);
				self.return_to_queue(&leased, &err.to_string()).await;
			}
		}
	}

	/// Hand a job back for backoff redelivery. When the queue parks the job
	/// instead (delivery budget exhausted), nothing would ever retake the
	/// message, so it is forced terminal rather than left stuck in a
	/// non-terminal status forever.
	async fn return_to_queue(&self, leased: &LeasedJob, reason: &str) {
		match self.queue.fail(&leased.job_id, reason).await {
			Ok(FailOutcome::Retrying { delay }) => {
				debug!("job {} retrying in {:?}", leased.job_id, delay);
			}
			Ok(FailOutcome::Parked) => {
				warn!("job {} parked by the queue", leased.job_id);
				self.abandon_message(leased.job.message_id, reason).await;
			}
			Err(err) => warn!("could not return job {} to queue: {}", leased.job_id, err),
		}
	}

	async fn abandon_message(&self, message_id: MessageId, reason: &str) {
		let error = format!("delivery abandoned after repeated errors: {}", reason);
		match self.store.mark_abandoned(message_id, &error).await {
			Ok(true) => {
				warn!("message {} marked failed; its delivery job was parked", message_id);
			}
			Ok(false) => {}
			Err(err) => {
				error!("could not mark abandoned message {} failed: {}", message_id, err);
			}
		}
	}

	async fn process(&self, leased: &LeasedJob) -> ClResult<Verdict> {
		let job = &leased.job;

		let msg = match self.store.claim_message(job.message_id, &leased.job_id).await? {
			ClaimOutcome::Claimed(msg) => msg,
			ClaimOutcome::Missing => {
				debug!("message {} gone (cancelled); dropping job {}", job.message_id, leased.job_id);
				return Ok(Verdict::Done);
			}
			ClaimOutcome::Terminal => {
				debug!("message {} already terminal; dropping job {}", job.message_id, leased.job_id);
				return Ok(Verdict::Done);
			}
		};

		let decision = self.limiter.check(msg.sender_id).await?;
		if !decision.allowed {
			return self.defer_for_quota(leased, &msg, decision.next_slot_at).await;
		}

		let send_result = match self.resolve_envelope(&msg).await {
			Ok((config, envelope)) => self.transport.send(config.as_ref(), &envelope).await,
			Err(err @ Error::TransportFailure(_)) => Err(err),
			Err(err) => return Err(err),
		};

		match send_result {
			Ok(receipt) => {
				// Counters bump only after the transport accepted the send
				if let Err(err) = self.limiter.increment(msg.sender_id).await {
					warn!("rate counter increment failed for message {}: {}", msg.id, err);
				}
				let provider_id = receipt
					.message_id
					.unwrap_or_else(|| format!("<{}@dripmail>", Uuid::new_v4()).into());
				self.confirm_sent(msg.id, &provider_id, receipt.preview_url.as_deref()).await;
				info!("message {} sent to {}", msg.id, msg.recipient);
				Ok(Verdict::Done)
			}
			Err(err) => self.handle_send_failure(&msg, &err).await,
		}
	}

	/// Record a confirmed send. The transport already accepted the message,
	/// so this must never travel back through queue redelivery: a second
	/// delivery of the job would send the email twice. The update is
	/// idempotent (guarded on PROCESSING), so transient store errors are
	/// retried right here instead.
	async fn confirm_sent(
		&self,
		message_id: MessageId,
		provider_id: &str,
		preview_url: Option<&str>,
	) {
		let mut wait = Duration::from_millis(100);
		for attempt in 1..=SENT_CONFIRM_ATTEMPTS {
			match self.store.mark_sent(message_id, provider_id, preview_url).await {
				Ok(()) => return,
				// Not in PROCESSING: an earlier attempt already committed
				Err(Error::Internal(_)) => {
					debug!("message {} already recorded as sent", message_id);
					return;
				}
				Err(err) if attempt < SENT_CONFIRM_ATTEMPTS => {
					warn!(
						"could not record message {} as sent (attempt {}/{}): {}",
						message_id, attempt, SENT_CONFIRM_ATTEMPTS, err
					);
					tokio::time::sleep(wait).await;
					wait *= 2;
				}
				Err(err) => {
					error!(
						"message {} was delivered but could not be recorded as SENT; leaving the row PROCESSING rather than risking a duplicate send: {}",
						message_id, err
					);
				}
			}
		}
	}

	/// Quota denied: park the message on the next slot with a fresh job at
	/// attempt + 1, and acknowledge the current job as completed-with-
	/// deferral so queue backoff never compounds quota waits.
	async fn defer_for_quota(
		&self,
		leased: &LeasedJob,
		msg: &Message,
		next_slot_at: Timestamp,
	) -> ClResult<Verdict> {
		self.store.mark_rate_limited(msg.id).await?;

		let fresh = leased.job.next_attempt();
		let delay = Duration::from_secs((next_slot_at.0 - Timestamp::now().0).max(0) as u64);
		let opts = EnqueueOptions {
			delay,
			priority: 0,
			max_attempts: self.config.max_retries + 1,
			initial_backoff: self.config.initial_backoff,
		};
		let outcome = self.queue.enqueue(&fresh, &opts).await?;
		self.store.reschedule(msg.id, next_slot_at, outcome.job_id()).await?;

		info!(
			"message {} rate limited; deferred to {} (attempt {})",
			msg.id,
			next_slot_at.to_iso(),
			fresh.attempt
		);
		Ok(Verdict::Done)
	}

	/// From-header identity and rendered bodies for a claimed message. A
	/// vanished sender is a send failure (subject to the retry budget), not
	/// an infrastructure error.
	async fn resolve_envelope(&self, msg: &Message) -> ClResult<(Option<SmtpConfig>, Envelope)> {
		let sender_id = msg
			.sender_id
			.ok_or_else(|| Error::TransportFailure("sender no longer exists".into()))?;
		let sender = match self.store.read_sender(msg.user_id, sender_id).await {
			Ok(sender) => sender,
			Err(Error::NotFound) => {
				return Err(Error::TransportFailure("sender no longer exists".into()));
			}
			Err(err) => return Err(err),
		};

		let config = sender.smtp_config().or_else(|| self.config.default_smtp.clone());
		let envelope = Envelope {
			from_name: sender.name,
			from_email: sender.email,
			to: msg.recipient.clone(),
			subject: msg.subject.clone(),
			text: html_to_text(&msg.body).into(),
			html: msg.body.clone(),
		};

		Ok((config, envelope))
	}

	async fn handle_send_failure(&self, msg: &Message, err: &Error) -> ClResult<Verdict> {
		let reason = err.to_string();
		if msg.retry_count + 1 >= msg.max_retries {
			self.store.mark_failed(msg.id, &reason).await?;
			warn!(
				"message {} failed permanently after {} attempt(s): {}",
				msg.id,
				msg.retry_count + 1,
				reason
			);
			Ok(Verdict::Done)
		} else {
			let count = self.store.mark_retry(msg.id, &reason).await?;
			debug!(
				"message {} send failed (retry {}/{}): {}",
				msg.id, count, msg.max_retries, reason
			);
			Ok(Verdict::Retry(reason))
		}
	}
}

// vim: ts=4

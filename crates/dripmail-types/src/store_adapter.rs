//! Adapter that manages durable records: users, senders, messages, batches,
//! and rate counters.
//!
//! The store is shared by the HTTP handlers, the scheduling coordinator, and
//! the worker pool. Per-row optimistic writes are sufficient: transitions out
//! of PROCESSING are always performed by the single worker holding the queue
//! lease for the message's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::prelude::*;
use crate::transport_adapter::SmtpConfig;

// Users //
//*******//

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub id: UserId,
	pub external_id: Box<str>,
	pub email: Box<str>,
	pub name: Box<str>,
	pub avatar_url: Option<Box<str>>,
	pub created_at: Timestamp,
}

/// Identity attributes used to create-or-refresh a user row at login
#[derive(Debug, Clone)]
pub struct UpsertUser<'a> {
	pub external_id: &'a str,
	pub email: &'a str,
	pub name: &'a str,
	pub avatar_url: Option<&'a str>,
}

// Senders //
//*********//

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
	pub id: SenderId,
	pub user_id: UserId,
	pub email: Box<str>,
	pub name: Box<str>,
	pub smtp_host: Option<Box<str>>,
	pub smtp_port: Option<u16>,
	pub smtp_user: Option<Box<str>>,
	#[serde(skip_serializing)]
	pub smtp_secret: Option<Box<str>>,
	pub is_default: bool,
	pub is_active: bool,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

impl Sender {
	/// Private relay settings, when the sender carries a complete set.
	/// Port 465 implies implicit TLS; anything else negotiates STARTTLS.
	pub fn smtp_config(&self) -> Option<SmtpConfig> {
		match (&self.smtp_host, &self.smtp_user, &self.smtp_secret) {
			(Some(host), Some(user), Some(secret)) => {
				let port = self.smtp_port.unwrap_or(587);
				Some(SmtpConfig {
					host: host.clone(),
					port,
					secure: port == 465,
					user: user.clone(),
					secret: secret.clone(),
				})
			}
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct CreateSender<'a> {
	pub email: &'a str,
	pub name: &'a str,
	pub smtp_host: Option<&'a str>,
	pub smtp_port: Option<u16>,
	pub smtp_user: Option<&'a str>,
	pub smtp_secret: Option<&'a str>,
	pub is_default: bool,
}

/// PATCH-style partial update for a sender
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSender {
	#[serde(default)]
	pub email: Patch<Box<str>>,
	#[serde(default)]
	pub name: Patch<Box<str>>,
	#[serde(default)]
	pub smtp_host: Patch<Box<str>>,
	#[serde(default)]
	pub smtp_port: Patch<u16>,
	#[serde(default)]
	pub smtp_user: Patch<Box<str>>,
	#[serde(default)]
	pub smtp_secret: Patch<Box<str>>,
	#[serde(default)]
	pub is_default: Patch<bool>,
	#[serde(default)]
	pub is_active: Patch<bool>,
}

// Batches //
//*********//

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
	pub id: BatchId,
	pub user_id: UserId,
	pub total_emails: u32,
	pub scheduled_emails: u32,
	pub sent_emails: u32,
	pub failed_emails: u32,
	pub start_time: Timestamp,
	pub delay_secs: u32,
	pub hourly_limit: u32,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct CreateBatch {
	pub total_emails: u32,
	pub start_time: Timestamp,
	pub delay_secs: u32,
	pub hourly_limit: u32,
}

// Messages //
//**********//

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub id: MessageId,
	pub user_id: UserId,
	pub sender_id: Option<SenderId>,
	pub batch_id: BatchId,
	pub batch_index: u32,
	pub recipient: Box<str>,
	pub subject: Box<str>,
	pub body: Box<str>,
	pub status: MessageStatus,
	pub scheduled_at: Timestamp,
	pub sent_at: Option<Timestamp>,
	pub error_message: Option<Box<str>>,
	pub retry_count: u32,
	pub max_retries: u32,
	pub job_id: Option<Box<str>>,
	pub provider_message_id: Option<Box<str>>,
	pub preview_url: Option<Box<str>>,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct CreateMessage<'a> {
	pub sender_id: Option<SenderId>,
	pub recipient: &'a str,
	pub subject: &'a str,
	pub body: &'a str,
	pub scheduled_at: Timestamp,
	pub batch_index: u32,
	pub max_retries: u32,
}

/// Result of a worker claiming a message before sending
#[derive(Debug)]
pub enum ClaimOutcome {
	/// Message is now PROCESSING and owned by the caller
	Claimed(Message),
	/// Row no longer exists (cancelled); acknowledge and drop
	Missing,
	/// Row is already SENT or FAILED; acknowledge and drop
	Terminal,
}

/// Sort key whitelist for message listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageSortKey {
	#[default]
	ScheduledAt,
	CreatedAt,
	SentAt,
	Status,
}

impl std::str::FromStr for MessageSortKey {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"scheduledAt" => Ok(MessageSortKey::ScheduledAt),
			"createdAt" => Ok(MessageSortKey::CreatedAt),
			"sentAt" => Ok(MessageSortKey::SentAt),
			"status" => Ok(MessageSortKey::Status),
			_ => Err(Error::Validation(format!("invalid sort key: {}", s))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
	Asc,
	#[default]
	Desc,
}

impl std::str::FromStr for SortOrder {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"asc" => Ok(SortOrder::Asc),
			"desc" => Ok(SortOrder::Desc),
			_ => Err(Error::Validation(format!("invalid sort order: {}", s))),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct ListMessageOptions {
	pub statuses: Option<Vec<MessageStatus>>,
	/// 1-based page number
	pub page: u32,
	pub limit: u32,
	pub sort_by: MessageSortKey,
	pub sort_order: SortOrder,
}

/// Per-user counts by status
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
	pub scheduled: u64,
	pub processing: u64,
	pub sent: u64,
	pub failed: u64,
	pub rate_limited: u64,
	pub total: u64,
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
	// Users
	//*******
	/// Create or refresh the user row for a resolved external identity
	async fn upsert_user(&self, data: &UpsertUser<'_>) -> ClResult<User>;
	async fn read_user(&self, user_id: UserId) -> ClResult<User>;

	// Senders
	//*********
	async fn create_sender(&self, user_id: UserId, data: &CreateSender<'_>) -> ClResult<Sender>;
	async fn list_senders(&self, user_id: UserId) -> ClResult<Vec<Sender>>;
	async fn read_sender(&self, user_id: UserId, sender_id: SenderId) -> ClResult<Sender>;
	async fn update_sender(
		&self,
		user_id: UserId,
		sender_id: SenderId,
		patch: &UpdateSender,
	) -> ClResult<Sender>;
	/// Refused with `Conflict` when this is the user's last sender and
	/// messages still reference it; otherwise message references are nulled.
	async fn delete_sender(&self, user_id: UserId, sender_id: SenderId) -> ClResult<()>;
	async fn default_sender(&self, user_id: UserId) -> ClResult<Option<Sender>>;
	async fn any_active_sender(&self, user_id: UserId) -> ClResult<Option<Sender>>;

	// Batches
	//*********
	async fn create_batch(&self, user_id: UserId, data: &CreateBatch) -> ClResult<Batch>;
	async fn read_batch(&self, user_id: UserId, batch_id: BatchId) -> ClResult<Batch>;

	// Messages
	//**********
	/// Bulk-insert the batch's messages as SCHEDULED, in batch-index order
	async fn create_messages(
		&self,
		user_id: UserId,
		batch_id: BatchId,
		messages: &[CreateMessage<'_>],
	) -> ClResult<Vec<Message>>;
	async fn read_message(&self, user_id: UserId, message_id: MessageId) -> ClResult<Message>;
	/// Transition to PROCESSING under the given queue job id. Accepts
	/// SCHEDULED, RATE_LIMITED, and (after a worker crash) PROCESSING rows.
	async fn claim_message(&self, message_id: MessageId, job_id: &str) -> ClResult<ClaimOutcome>;
	/// Terminal success: SENT + sent_at + provider id, and the batch's sent
	/// counter, in one transaction
	async fn mark_sent(
		&self,
		message_id: MessageId,
		provider_message_id: &str,
		preview_url: Option<&str>,
	) -> ClResult<()>;
	/// Terminal failure: FAILED + error, and the batch's failed counter
	async fn mark_failed(&self, message_id: MessageId, error: &str) -> ClResult<()>;
	/// Transient failure: back to SCHEDULED with the error recorded and the
	/// retry count bumped; returns the new retry count
	async fn mark_retry(&self, message_id: MessageId, error: &str) -> ClResult<u32>;
	async fn mark_rate_limited(&self, message_id: MessageId) -> ClResult<()>;
	/// Quota deferral: RATE_LIMITED back to SCHEDULED at the next slot,
	/// tracking the fresh queue job
	async fn reschedule(
		&self,
		message_id: MessageId,
		scheduled_at: Timestamp,
		job_id: Option<&str>,
	) -> ClResult<()>;
	/// Mark every non-terminal message of a batch FAILED (enqueue failed
	/// after the rows were committed); returns the number of rows touched
	async fn mark_batch_failed(&self, batch_id: BatchId, error: &str) -> ClResult<u32>;
	/// Last-resort terminalization: the queue parked this message's delivery
	/// job, so no job will ever retake it. Forces FAILED from any
	/// non-terminal status, bumping the batch's failed counter; returns
	/// false when the row is already terminal or gone.
	async fn mark_abandoned(&self, message_id: MessageId, error: &str) -> ClResult<bool>;
	/// Best-effort: record the queue job id on a freshly scheduled message
	async fn link_job_id(&self, message_id: MessageId, job_id: &str) -> ClResult<()>;
	async fn list_messages(
		&self,
		user_id: UserId,
		opts: &ListMessageOptions,
	) -> ClResult<(Vec<Message>, u64)>;
	async fn message_stats(&self, user_id: UserId) -> ClResult<MessageStats>;
	/// Hard delete (cancellation). PROCESSING rows are refused with
	/// `Conflict`.
	async fn delete_message(&self, user_id: UserId, message_id: MessageId) -> ClResult<()>;
	/// SENT messages inside `[from, to)`, optionally scoped to a sender;
	/// the rate limiter's durable fallback
	async fn count_sent_in_window(
		&self,
		sender_id: Option<SenderId>,
		from: Timestamp,
		to: Timestamp,
	) -> ClResult<u64>;

	// Rate counters
	//***************
	/// Upsert-increment the durable counter row for `key`
	async fn bump_rate_counter(
		&self,
		key: &str,
		window_start: Timestamp,
		window_end: Timestamp,
	) -> ClResult<()>;
	/// Reclaim counter rows whose window ended before `older_than`
	async fn prune_rate_counters(&self, older_than: Timestamp) -> ClResult<u64>;
}

// vim: ts=4

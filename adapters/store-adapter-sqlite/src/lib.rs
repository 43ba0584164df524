//! SQLite implementation of the dripmail durable store.
//!
//! One writer pool (single connection, WAL) serializes mutations; a small
//! read-only pool serves listings and lookups. Per-row optimistic writes are
//! enough because transitions out of PROCESSING are always made by the single
//! worker holding the queue lease.

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use std::path::Path;

use dripmail::prelude::*;
use dripmail::store_adapter::{
	Batch, ClaimOutcome, CreateBatch, CreateMessage, CreateSender, ListMessageOptions, Message,
	MessageStats, Sender, StoreAdapter, UpdateSender, UpsertUser, User,
};

mod batch;
mod message;
mod rate_counter;
mod schema;
mod sender;
mod user;
mod utils;

use schema::init_db;
use utils::db_err;

#[derive(Debug)]
pub struct StoreAdapterSqlite {
	db: SqlitePool,
	dbr: SqlitePool,
}

impl StoreAdapterSqlite {
	/// Open (or create) `store.db` under `path` and initialize the schema
	pub async fn new(path: impl AsRef<Path>) -> ClResult<Self> {
		let db_path = path.as_ref().join("store.db");
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(&db_path)
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);

		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts.clone())
			.await
			.map_err(db_err)?;
		let dbr = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts.read_only(true))
			.await
			.map_err(db_err)?;

		init_db(&db).await.map_err(db_err)?;

		Ok(Self { db, dbr })
	}
}

#[async_trait]
impl StoreAdapter for StoreAdapterSqlite {
	// Users
	//*******
	async fn upsert_user(&self, data: &UpsertUser<'_>) -> ClResult<User> {
		user::upsert(&self.db, data).await
	}

	async fn read_user(&self, user_id: UserId) -> ClResult<User> {
		user::read(&self.dbr, user_id).await
	}

	// Senders
	//*********
	async fn create_sender(&self, user_id: UserId, data: &CreateSender<'_>) -> ClResult<Sender> {
		sender::create(&self.db, user_id, data).await
	}

	async fn list_senders(&self, user_id: UserId) -> ClResult<Vec<Sender>> {
		sender::list(&self.dbr, user_id).await
	}

	async fn read_sender(&self, user_id: UserId, sender_id: SenderId) -> ClResult<Sender> {
		sender::read(&self.dbr, user_id, sender_id).await
	}

	async fn update_sender(
		&self,
		user_id: UserId,
		sender_id: SenderId,
		patch: &UpdateSender,
	) -> ClResult<Sender> {
		sender::update(&self.db, user_id, sender_id, patch).await
	}

	async fn delete_sender(&self, user_id: UserId, sender_id: SenderId) -> ClResult<()> {
		sender::delete(&self.db, user_id, sender_id).await
	}

	async fn default_sender(&self, user_id: UserId) -> ClResult<Option<Sender>> {
		sender::default_sender(&self.dbr, user_id).await
	}

	async fn any_active_sender(&self, user_id: UserId) -> ClResult<Option<Sender>> {
		sender::any_active(&self.dbr, user_id).await
	}

	// Batches
	//*********
	async fn create_batch(&self, user_id: UserId, data: &CreateBatch) -> ClResult<Batch> {
		batch::create(&self.db, user_id, data).await
	}

	async fn read_batch(&self, user_id: UserId, batch_id: BatchId) -> ClResult<Batch> {
		batch::read(&self.dbr, user_id, batch_id).await
	}

	// Messages
	//**********
	async fn create_messages(
		&self,
		user_id: UserId,
		batch_id: BatchId,
		messages: &[CreateMessage<'_>],
	) -> ClResult<Vec<Message>> {
		message::create_bulk(&self.db, user_id, batch_id, messages).await
	}

	async fn read_message(&self, user_id: UserId, message_id: MessageId) -> ClResult<Message> {
		message::read(&self.dbr, user_id, message_id).await
	}

	async fn claim_message(&self, message_id: MessageId, job_id: &str) -> ClResult<ClaimOutcome> {
		message::claim(&self.db, message_id, job_id).await
	}

	async fn mark_sent(
		&self,
		message_id: MessageId,
		provider_message_id: &str,
		preview_url: Option<&str>,
	) -> ClResult<()> {
		message::mark_sent(&self.db, message_id, provider_message_id, preview_url).await
	}

	async fn mark_failed(&self, message_id: MessageId, error: &str) -> ClResult<()> {
		message::mark_failed(&self.db, message_id, error).await
	}

	async fn mark_retry(&self, message_id: MessageId, error: &str) -> ClResult<u32> {
		message::mark_retry(&self.db, message_id, error).await
	}

	async fn mark_rate_limited(&self, message_id: MessageId) -> ClResult<()> {
		message::mark_rate_limited(&self.db, message_id).await
	}

	async fn reschedule(
		&self,
		message_id: MessageId,
		scheduled_at: Timestamp,
		job_id: Option<&str>,
	) -> ClResult<()> {
		message::reschedule(&self.db, message_id, scheduled_at, job_id).await
	}

	async fn mark_batch_failed(&self, batch_id: BatchId, error: &str) -> ClResult<u32> {
		message::mark_batch_failed(&self.db, batch_id, error).await
	}

	async fn mark_abandoned(&self, message_id: MessageId, error: &str) -> ClResult<bool> {
		message::mark_abandoned(&self.db, message_id, error).await
	}

	async fn link_job_id(&self, message_id: MessageId, job_id: &str) -> ClResult<()> {
		message::link_job_id(&self.db, message_id, job_id).await
	}

	async fn list_messages(
		&self,
		user_id: UserId,
		opts: &ListMessageOptions,
	) -> ClResult<(Vec<Message>, u64)> {
		message::list(&self.dbr, user_id, opts).await
	}

	async fn message_stats(&self, user_id: UserId) -> ClResult<MessageStats> {
		message::stats(&self.dbr, user_id).await
	}

	async fn delete_message(&self, user_id: UserId, message_id: MessageId) -> ClResult<()> {
		message::delete(&self.db, user_id, message_id).await
	}

	async fn count_sent_in_window(
		&self,
		sender_id: Option<SenderId>,
		from: Timestamp,
		to: Timestamp,
	) -> ClResult<u64> {
		message::count_sent_in_window(&self.dbr, sender_id, from, to).await
	}

	// Rate counters
	//***************
	async fn bump_rate_counter(
		&self,
		key: &str,
		window_start: Timestamp,
		window_end: Timestamp,
	) -> ClResult<()> {
		rate_counter::bump(&self.db, key, window_start, window_end).await
	}

	async fn prune_rate_counters(&self, older_than: Timestamp) -> ClResult<u64> {
		rate_counter::prune(&self.db, older_than).await
	}
}

// vim: ts=4

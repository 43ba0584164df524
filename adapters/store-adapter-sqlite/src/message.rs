//! Message persistence and the durable side of the send state machine
//!
//! Transitions out of PROCESSING are guarded by a status predicate in the
//! UPDATE so a stale writer cannot resurrect a terminal row.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use dripmail::prelude::*;
use dripmail::store_adapter::{
	ClaimOutcome, CreateMessage, ListMessageOptions, Message, MessageSortKey, MessageStats,
	SortOrder,
};

use crate::utils::*;

pub(crate) fn from_row(row: &SqliteRow) -> Result<Message, sqlx::Error> {
	let status: &str = row.try_get("status")?;
	Ok(Message {
		id: MessageId(row.try_get("message_id")?),
		user_id: UserId(row.try_get("user_id")?),
		sender_id: row.try_get::<Option<i64>, _>("sender_id")?.map(SenderId),
		batch_id: BatchId(row.try_get("batch_id")?),
		batch_index: row.try_get("batch_index")?,
		recipient: row.try_get("recipient")?,
		subject: row.try_get("subject")?,
		body: row.try_get("body")?,
		status: status.parse().map_err(|_| sqlx::Error::ColumnDecode {
			index: "status".into(),
			source: format!("invalid message status: {}", status).into(),
		})?,
		scheduled_at: row.try_get("scheduled_at").map(Timestamp)?,
		sent_at: row.try_get::<Option<i64>, _>("sent_at")?.map(Timestamp),
		error_message: row.try_get("error_message")?,
		retry_count: row.try_get("retry_count")?,
		max_retries: row.try_get("max_retries")?,
		job_id: row.try_get("job_id")?,
		provider_message_id: row.try_get("provider_message_id")?,
		preview_url: row.try_get("preview_url")?,
		created_at: row.try_get("created_at").map(Timestamp)?,
		updated_at: row.try_get("updated_at").map(Timestamp)?,
	})
}

pub(crate) async fn create_bulk(
	db: &SqlitePool,
	user_id: UserId,
	batch_id: BatchId,
	messages: &[CreateMessage<'_>],
) -> ClResult<Vec<Message>> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let mut created = Vec::with_capacity(messages.len());
	for msg in messages {
		let res = sqlx::query(
			"INSERT INTO messages (user_id, sender_id, batch_id, batch_index, recipient,
				subject, body, status, scheduled_at, max_retries)
			VALUES (?, ?, ?, ?, ?, ?, ?, 'SCHEDULED', ?, ?) RETURNING *",
		)
		.bind(user_id.0)
		.bind(msg.sender_id.map(|s| s.0))
		.bind(batch_id.0)
		.bind(msg.batch_index)
		.bind(msg.recipient)
		.bind(msg.subject)
		.bind(msg.body)
		.bind(msg.scheduled_at.0)
		.bind(msg.max_retries)
		.fetch_one(&mut *tx)
		.await;
		created.push(map_res(res, from_row)?);
	}

	tx.commit().await.map_err(db_err)?;

	Ok(created)
}

pub(crate) async fn read(
	db: &SqlitePool,
	user_id: UserId,
	message_id: MessageId,
) -> ClResult<Message> {
	let res = sqlx::query("SELECT * FROM messages WHERE message_id=? AND user_id=?")
		.bind(message_id.0)
		.bind(user_id.0)
		.fetch_one(db)
		.await;

	map_res(res, from_row)
}

pub(crate) async fn claim(
	db: &SqlitePool,
	message_id: MessageId,
	job_id: &str,
) -> ClResult<ClaimOutcome> {
	let res = sqlx::query(
		"UPDATE messages SET status='PROCESSING', job_id=?, updated_at=unixepoch()
		WHERE message_id=? AND status IN ('SCHEDULED', 'RATE_LIMITED', 'PROCESSING')
		RETURNING *",
	)
	.bind(job_id)
	.bind(message_id.0)
	.fetch_optional(db)
	.await
	.map_err(db_err)?;

	if let Some(row) = res {
		return Ok(ClaimOutcome::Claimed(from_row(&row).map_err(db_err)?));
	}

	// Not claimable: either cancelled (row gone) or already terminal
	let exists = sqlx::query("SELECT status FROM messages WHERE message_id=?")
		.bind(message_id.0)
		.fetch_optional(db)
		.await
		.map_err(db_err)?;

	match exists {
		Some(_) => Ok(ClaimOutcome::Terminal),
		None => Ok(ClaimOutcome::Missing),
	}
}

pub(crate) async fn mark_sent(
	db: &SqlitePool,
	message_id: MessageId,
	provider_message_id: &str,
	preview_url: Option<&str>,
) -> ClResult<()> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let res = sqlx::query(
		"UPDATE messages SET status='SENT', sent_at=unixepoch(), provider_message_id=?,
			preview_url=?, error_message=NULL, updated_at=unixepoch()
		WHERE message_id=? AND status='PROCESSING'",
	)
	.bind(provider_message_id)
	.bind(preview_url)
	.bind(message_id.0)
	.execute(&mut *tx)
	.await
	.map_err(db_err)?;
	if res.rows_affected() != 1 {
		return Err(Error::Internal(format!("message {} not in PROCESSING", message_id)));
	}

	sqlx::query(
		"UPDATE batches SET sent_emails=sent_emails+1, updated_at=unixepoch()
		WHERE batch_id=(SELECT batch_id FROM messages WHERE message_id=?)",
	)
	.bind(message_id.0)
	.execute(&mut *tx)
	.await
	.map_err(db_err)?;

	tx.commit().await.map_err(db_err)?;

	Ok(())
}

pub(crate) async fn mark_failed(db: &SqlitePool, message_id: MessageId, error: &str) -> ClResult<()> {
	let mut tx = db.begin().await.map_err(db_err)?;

	// The failing attempt counts: FAILED rows carry retry_count >= max_retries
	let res = sqlx::query(
		"UPDATE messages SET status='FAILED', error_message=?, retry_count=retry_count+1,
			updated_at=unixepoch()
		WHERE message_id=? AND status='PROCESSING'",
	)
	.bind(error)
	.bind(message_id.0)
	.execute(&mut *tx)
	.await
	.map_err(db_err)?;
	if res.rows_affected() != 1 {
		return Err(Error::Internal(format!("message {} not in PROCESSING", message_id)));
	}

	sqlx::query(
		"UPDATE batches SET failed_emails=failed_emails+1, updated_at=unixepoch()
		WHERE batch_id=(SELECT batch_id FROM messages WHERE message_id=?)",
	)
	.bind(message_id.0)
	.execute(&mut *tx)
	.await
	.map_err(db_err)?;

	tx.commit().await.map_err(db_err)?;

	Ok(())
}

pub(crate) async fn mark_retry(
	db: &SqlitePool,
	message_id: MessageId,
	error: &str,
) -> ClResult<u32> {
	let res = sqlx::query(
		"UPDATE messages SET status='SCHEDULED', error_message=?, retry_count=retry_count+1,
			updated_at=unixepoch()
		WHERE message_id=? AND status='PROCESSING'
		RETURNING retry_count",
	)
	.bind(error)
	.bind(message_id.0)
	.fetch_one(db)
	.await;

	map_res(res, |row| row.try_get("retry_count"))
}

pub(crate) async fn mark_rate_limited(db: &SqlitePool, message_id: MessageId) -> ClResult<()> {
	sqlx::query(
		"UPDATE messages SET status='RATE_LIMITED', updated_at=unixepoch()
		WHERE message_id=? AND status='PROCESSING'",
	)
	.bind(message_id.0)
	.execute(db)
	.await
	.map_err(db_err)?;

	Ok(())
}

pub(crate) async fn reschedule(
	db: &SqlitePool,
	message_id: MessageId,
	scheduled_at: Timestamp,
	job_id: Option<&str>,
) -> ClResult<()> {
	sqlx::query(
		"UPDATE messages SET status='SCHEDULED', scheduled_at=?, job_id=COALESCE(?, job_id),
			updated_at=unixepoch()
		WHERE message_id=? AND status='RATE_LIMITED'",
	)
	.bind(scheduled_at.0)
	.bind(job_id)
	.bind(message_id.0)
	.execute(db)
	.await
	.map_err(db_err)?;

	Ok(())
}

/// Force FAILED from any non-terminal status. Used when the queue has
/// given up on the message's job and nothing would ever retake the row.
pub(crate) async fn mark_abandoned(
	db: &SqlitePool,
	message_id: MessageId,
	error: &str,
) -> ClResult<bool> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let res = sqlx::query(
		"UPDATE messages SET status='FAILED', error_message=?, updated_at=unixepoch()
		WHERE message_id=? AND status IN ('SCHEDULED', 'PROCESSING', 'RATE_LIMITED')",
	)
	.bind(error)
	.bind(message_id.0)
	.execute(&mut *tx)
	.await
	.map_err(db_err)?;
	let abandoned = res.rows_affected() == 1;

	if abandoned {
		sqlx::query(
			"UPDATE batches SET failed_emails=failed_emails+1, updated_at=unixepoch()
			WHERE batch_id=(SELECT batch_id FROM messages WHERE message_id=?)",
		)
		.bind(message_id.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;
	}

	tx.commit().await.map_err(db_err)?;

	Ok(abandoned)
}

pub(crate) async fn mark_batch_failed(
	db: &SqlitePool,
	batch_id: BatchId,
	error: &str,
) -> ClResult<u32> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let res = sqlx::query(
		"UPDATE messages SET status='FAILED', error_message=?, updated_at=unixepoch()
		WHERE batch_id=? AND status IN ('SCHEDULED', 'PROCESSING', 'RATE_LIMITED')",
	)
	.bind(error)
	.bind(batch_id.0)
	.execute(&mut *tx)
	.await
	.map_err(db_err)?;
	let failed = res.rows_affected() as u32;

	sqlx::query(
		"UPDATE batches SET failed_emails=failed_emails+?, updated_at=unixepoch() WHERE batch_id=?",
	)
	.bind(failed)
	.bind(batch_id.0)
	.execute(&mut *tx)
	.await
	.map_err(db_err)?;

	tx.commit().await.map_err(db_err)?;

	Ok(failed)
}

pub(crate) async fn link_job_id(db: &SqlitePool, message_id: MessageId, job_id: &str) -> ClResult<()> {
	sqlx::query(
		"UPDATE messages SET job_id=?, updated_at=unixepoch()
		WHERE message_id=? AND status='SCHEDULED'",
	)
	.bind(job_id)
	.bind(message_id.0)
	.execute(db)
	.await
	.map_err(db_err)?;

	Ok(())
}

fn sort_sql(key: MessageSortKey, order: SortOrder) -> &'static str {
	match (key, order) {
		(MessageSortKey::ScheduledAt, SortOrder::Asc) => "scheduled_at ASC",
		(MessageSortKey::ScheduledAt, SortOrder::Desc) => "scheduled_at DESC",
		(MessageSortKey::CreatedAt, SortOrder::Asc) => "created_at ASC",
		(MessageSortKey::CreatedAt, SortOrder::Desc) => "created_at DESC",
		(MessageSortKey::SentAt, SortOrder::Asc) => "sent_at ASC",
		(MessageSortKey::SentAt, SortOrder::Desc) => "sent_at DESC",
		(MessageSortKey::Status, SortOrder::Asc) => "status ASC",
		(MessageSortKey::Status, SortOrder::Desc) => "status DESC",
	}
}

fn push_status_filter<'a>(
	mut query: sqlx::QueryBuilder<'a, sqlx::Sqlite>,
	opts: &'a ListMessageOptions,
) -> sqlx::QueryBuilder<'a, sqlx::Sqlite> {
	if let Some(statuses) = &opts.statuses {
		query.push(" AND status IN (");
		let mut sep = query.separated(", ");
		for status in statuses {
			sep.push_bind(status.as_str());
		}
		query.push(")");
	}
	query
}

pub(crate) async fn list(
	db: &SqlitePool,
	user_id: UserId,
	opts: &ListMessageOptions,
) -> ClResult<(Vec<Message>, u64)> {
	let mut count_query =
		sqlx::QueryBuilder::new("SELECT COUNT(*) AS n FROM messages WHERE user_id=");
	count_query.push_bind(user_id.0);
	let mut count_query = push_status_filter(count_query, opts);
	let total: i64 = count_query
		.build()
		.fetch_one(db)
		.await
		.map_err(db_err)?
		.try_get("n")
		.map_err(db_err)?;

	let limit = opts.limit.clamp(1, 100);
	let offset = opts.page.max(1).saturating_sub(1) * limit;

	let mut query = sqlx::QueryBuilder::new("SELECT * FROM messages WHERE user_id=");
	query.push_bind(user_id.0);
	let mut query = push_status_filter(query, opts);
	query
		.push(" ORDER BY ")
		.push(sort_sql(opts.sort_by, opts.sort_order))
		.push(", message_id LIMIT ")
		.push_bind(i64::from(limit))
		.push(" OFFSET ")
		.push_bind(i64::from(offset));

	let rows = query.build().fetch_all(db).await.map_err(db_err)?;
	let messages = collect_res(rows.iter().map(from_row))?;

	Ok((messages, total as u64))
}

pub(crate) async fn stats(db: &SqlitePool, user_id: UserId) -> ClResult<MessageStats> {
	let rows = sqlx::query(
		"SELECT status, COUNT(*) AS n FROM messages WHERE user_id=? GROUP BY status",
	)
	.bind(user_id.0)
	.fetch_all(db)
	.await
	.map_err(db_err)?;

	let mut stats = MessageStats::default();
	for row in rows {
		let status: &str = row.try_get("status").map_err(db_err)?;
		let n: i64 = row.try_get("n").map_err(db_err)?;
		let n = n as u64;
		match status.parse::<MessageStatus>() {
			Ok(MessageStatus::Scheduled) => stats.scheduled = n,
			Ok(MessageStatus::Processing) => stats.processing = n,
			Ok(MessageStatus::Sent) => stats.sent = n,
			Ok(MessageStatus::Failed) => stats.failed = n,
			Ok(MessageStatus::RateLimited) => stats.rate_limited = n,
			Err(_) => warn!("unknown message status in store: {}", status),
		}
		stats.total += n;
	}

	Ok(stats)
}

pub(crate) async fn delete(
	db: &SqlitePool,
	user_id: UserId,
	message_id: MessageId,
) -> ClResult<()> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let row = sqlx::query("SELECT status FROM messages WHERE message_id=? AND user_id=?")
		.bind(message_id.0)
		.bind(user_id.0)
		.fetch_optional(&mut *tx)
		.await
		.map_err(db_err)?
		.ok_or(Error::NotFound)?;
	let status: &str = row.try_get("status").map_err(db_err)?;
	if status == "PROCESSING" {
		return Err(Error::Conflict("message is being processed and cannot be cancelled".into()));
	}

	sqlx::query("DELETE FROM messages WHERE message_id=?")
		.bind(message_id.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;

	tx.commit().await.map_err(db_err)?;

	Ok(())
}

pub(crate) async fn count_sent_in_window(
	db: &SqlitePool,
	sender_id: Option<SenderId>,
	from: Timestamp,
	to: Timestamp,
) -> ClResult<u64> {
	let mut query = sqlx::QueryBuilder::new(
		"SELECT COUNT(*) AS n FROM messages WHERE status='SENT' AND sent_at>=",
	);
	query.push_bind(from.0).push(" AND sent_at<").push_bind(to.0);
	if let Some(sender_id) = sender_id {
		query.push(" AND sender_id=").push_bind(sender_id.0);
	}

	let n: i64 = query
		.build()
		.fetch_one(db)
		.await
		.map_err(db_err)?
		.try_get("n")
		.map_err(db_err)?;

	Ok(n as u64)
}

// vim: ts=4

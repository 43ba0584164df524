//! Batch persistence

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use dripmail::prelude::*;
use dripmail::store_adapter::{Batch, CreateBatch};

use crate::utils::*;

pub(crate) fn from_row(row: &SqliteRow) -> Result<Batch, sqlx::Error> {
	Ok(Batch {
		id: BatchId(row.try_get("batch_id")?),
		user_id: UserId(row.try_get("user_id")?),
		total_emails: row.try_get("total_emails")?,
		scheduled_emails: row.try_get("scheduled_emails")?,
		sent_emails: row.try_get("sent_emails")?,
		failed_emails: row.try_get("failed_emails")?,
		start_time: row.try_get("start_time").map(Timestamp)?,
		delay_secs: row.try_get("delay_secs")?,
		hourly_limit: row.try_get("hourly_limit")?,
		created_at: row.try_get("created_at").map(Timestamp)?,
		updated_at: row.try_get("updated_at").map(Timestamp)?,
	})
}

pub(crate) async fn create(db: &SqlitePool, user_id: UserId, data: &CreateBatch) -> ClResult<Batch> {
	let res = sqlx::query(
		"INSERT INTO batches (user_id, total_emails, scheduled_emails, start_time, delay_secs, hourly_limit)
		VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
	)
	.bind(user_id.0)
	.bind(data.total_emails)
	.bind(data.total_emails)
	.bind(data.start_time.0)
	.bind(data.delay_secs)
	.bind(data.hourly_limit)
	.fetch_one(db)
	.await;

	map_res(res, from_row)
}

pub(crate) async fn read(db: &SqlitePool, user_id: UserId, batch_id: BatchId) -> ClResult<Batch> {
	let res = sqlx::query("SELECT * FROM batches WHERE batch_id=? AND user_id=?")
		.bind(batch_id.0)
		.bind(user_id.0)
		.fetch_one(db)
		.await;

	map_res(res, from_row)
}

// vim: ts=4

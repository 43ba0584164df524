//! Sender persistence
//!
//! Invariants enforced here: `(user_id, email)` unique, at most one default
//! per user, and the last sender cannot be deleted while messages still
//! reference it.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use dripmail::prelude::*;
use dripmail::store_adapter::{CreateSender, Sender, UpdateSender};

use crate::utils::*;

fn from_row(row: &SqliteRow) -> Result<Sender, sqlx::Error> {
	Ok(Sender {
		id: SenderId(row.try_get("sender_id")?),
		user_id: UserId(row.try_get("user_id")?),
		email: row.try_get("email")?,
		name: row.try_get("name")?,
		smtp_host: row.try_get("smtp_host")?,
		smtp_port: row.try_get::<Option<u16>, _>("smtp_port")?,
		smtp_user: row.try_get("smtp_user")?,
		smtp_secret: row.try_get("smtp_secret")?,
		is_default: row.try_get("is_default")?,
		is_active: row.try_get("is_active")?,
		created_at: row.try_get("created_at").map(Timestamp)?,
		updated_at: row.try_get("updated_at").map(Timestamp)?,
	})
}

pub(crate) async fn create(
	db: &SqlitePool,
	user_id: UserId,
	data: &CreateSender<'_>,
) -> ClResult<Sender> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let existing: i64 = sqlx::query("SELECT COUNT(*) AS n FROM senders WHERE user_id=?")
		.bind(user_id.0)
		.fetch_one(&mut *tx)
		.await
		.map_err(db_err)?
		.try_get("n")
		.map_err(db_err)?;

	// A user's first sender always becomes the default
	let is_default = data.is_default || existing == 0;
	if is_default {
		sqlx::query("UPDATE senders SET is_default=0, updated_at=unixepoch() WHERE user_id=? AND is_default=1")
			.bind(user_id.0)
			.execute(&mut *tx)
			.await
			.map_err(db_err)?;
	}

	let res = sqlx::query(
		"INSERT INTO senders (user_id, email, name, smtp_host, smtp_port, smtp_user, smtp_secret, is_default)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
	)
	.bind(user_id.0)
	.bind(data.email)
	.bind(data.name)
	.bind(data.smtp_host)
	.bind(data.smtp_port)
	.bind(data.smtp_user)
	.bind(data.smtp_secret)
	.bind(is_default)
	.fetch_one(&mut *tx)
	.await;
	let sender = map_res(res, from_row)?;

	tx.commit().await.map_err(db_err)?;

	Ok(sender)
}

pub(crate) async fn list(db: &SqlitePool, user_id: UserId) -> ClResult<Vec<Sender>> {
	let rows = sqlx::query(
		"SELECT * FROM senders WHERE user_id=? ORDER BY is_default DESC, created_at, sender_id",
	)
	.bind(user_id.0)
	.fetch_all(db)
	.await
	.map_err(db_err)?;

	collect_res(rows.iter().map(from_row))
}

pub(crate) async fn read(db: &SqlitePool, user_id: UserId, sender_id: SenderId) -> ClResult<Sender> {
	let res = sqlx::query("SELECT * FROM senders WHERE sender_id=? AND user_id=?")
		.bind(sender_id.0)
		.bind(user_id.0)
		.fetch_one(db)
		.await;

	map_res(res, from_row)
}

pub(crate) async fn update(
	db: &SqlitePool,
	user_id: UserId,
	sender_id: SenderId,
	patch: &UpdateSender,
) -> ClResult<Sender> {
	let mut tx = db.begin().await.map_err(db_err)?;

	// Ownership check up front so a foreign id is a 404, not a silent no-op
	sqlx::query("SELECT sender_id FROM senders WHERE sender_id=? AND user_id=?")
		.bind(sender_id.0)
		.bind(user_id.0)
		.fetch_optional(&mut *tx)
		.await
		.map_err(db_err)?
		.ok_or(Error::NotFound)?;

	if let Patch::Value(true) = patch.is_default {
		sqlx::query("UPDATE senders SET is_default=0, updated_at=unixepoch() WHERE user_id=? AND is_default=1")
			.bind(user_id.0)
			.execute(&mut *tx)
			.await
			.map_err(db_err)?;
	}

	let mut query = sqlx::QueryBuilder::new("UPDATE senders SET ");
	let mut has_updates = false;
	has_updates = push_patch!(query, has_updates, "email", &patch.email, |v| v.as_ref());
	has_updates = push_patch!(query, has_updates, "name", &patch.name, |v| v.as_ref());
	has_updates = push_patch!(query, has_updates, "smtp_host", &patch.smtp_host, |v| v.as_ref());
	has_updates = push_patch!(query, has_updates, "smtp_port", &patch.smtp_port, |v| i64::from(*v));
	has_updates = push_patch!(query, has_updates, "smtp_user", &patch.smtp_user, |v| v.as_ref());
	has_updates =
		push_patch!(query, has_updates, "smtp_secret", &patch.smtp_secret, |v| v.as_ref());
	has_updates = push_patch!(query, has_updates, "is_default", &patch.is_default, |v| *v);
	has_updates = push_patch!(query, has_updates, "is_active", &patch.is_active, |v| *v);

	if has_updates {
		query.push(", updated_at=unixepoch() WHERE sender_id=").push_bind(sender_id.0);
		query.build().execute(&mut *tx).await.map_err(db_err)?;
	}

	let res = sqlx::query("SELECT * FROM senders WHERE sender_id=?")
		.bind(sender_id.0)
		.fetch_one(&mut *tx)
		.await;
	let sender = map_res(res, from_row)?;

	tx.commit().await.map_err(db_err)?;

	Ok(sender)
}

pub(crate) async fn delete(db: &SqlitePool, user_id: UserId, sender_id: SenderId) -> ClResult<()> {
	let mut tx = db.begin().await.map_err(db_err)?;

	let row = sqlx::query("SELECT is_default FROM senders WHERE sender_id=? AND user_id=?")
		.bind(sender_id.0)
		.bind(user_id.0)
		.fetch_optional(&mut *tx)
		.await
		.map_err(db_err)?
		.ok_or(Error::NotFound)?;
	let was_default: bool = row.try_get("is_default").map_err(db_err)?;

	let sender_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM senders WHERE user_id=?")
		.bind(user_id.0)
		.fetch_one(&mut *tx)
		.await
		.map_err(db_err)?
		.try_get("n")
		.map_err(db_err)?;

	if sender_count == 1 {
		let referenced: i64 = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE sender_id=?")
			.bind(sender_id.0)
			.fetch_one(&mut *tx)
			.await
			.map_err(db_err)?
			.try_get("n")
			.map_err(db_err)?;
		if referenced > 0 {
			return Err(Error::Conflict(
				"cannot delete the last sender while messages reference it".into(),
			));
		}
	}

	// FK set-null semantics, done explicitly
	sqlx::query("UPDATE messages SET sender_id=NULL, updated_at=unixepoch() WHERE sender_id=?")
		.bind(sender_id.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;
	sqlx::query("DELETE FROM senders WHERE sender_id=?")
		.bind(sender_id.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;

	// Keep exactly one default around when the default was removed
	if was_default {
		sqlx::query(
			"UPDATE senders SET is_default=1, updated_at=unixepoch()
			WHERE sender_id=(
				SELECT sender_id FROM senders WHERE user_id=? AND is_active=1
				ORDER BY created_at, sender_id LIMIT 1
			)",
		)
		.bind(user_id.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;
	}

	tx.commit().await.map_err(db_err)?;

	Ok(())
}

pub(crate) async fn default_sender(db: &SqlitePool, user_id: UserId) -> ClResult<Option<Sender>> {
	let res = sqlx::query(
		"SELECT * FROM senders WHERE user_id=? AND is_default=1 AND is_active=1 LIMIT 1",
	)
	.bind(user_id.0)
	.fetch_optional(db)
	.await
	.map_err(db_err)?;

	res.map(|row| from_row(&row).map_err(db_err)).transpose()
}

pub(crate) async fn any_active(db: &SqlitePool, user_id: UserId) -> ClResult<Option<Sender>> {
	let res = sqlx::query(
		"SELECT * FROM senders WHERE user_id=? AND is_active=1 ORDER BY created_at, sender_id LIMIT 1",
	)
	.bind(user_id.0)
	.fetch_optional(db)
	.await
	.map_err(db_err)?;

	res.map(|row| from_row(&row).map_err(db_err)).transpose()
}

// vim: ts=4

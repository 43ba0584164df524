//! User persistence

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use dripmail::prelude::*;
use dripmail::store_adapter::{UpsertUser, User};

use crate::utils::*;

fn from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
	Ok(User {
		id: UserId(row.try_get("user_id")?),
		external_id: row.try_get("external_id")?,
		email: row.try_get("email")?,
		name: row.try_get("name")?,
		avatar_url: row.try_get("avatar_url")?,
		created_at: row.try_get("created_at").map(Timestamp)?,
	})
}

/// Create or refresh the row for a resolved external identity
pub(crate) async fn upsert(db: &SqlitePool, data: &UpsertUser<'_>) -> ClResult<User> {
	let res = sqlx::query(
		"INSERT INTO users (external_id, email, name, avatar_url)
		VALUES (?, ?, ?, ?)
		ON CONFLICT(external_id) DO UPDATE SET
			email=excluded.email, name=excluded.name, avatar_url=excluded.avatar_url
		RETURNING *",
	)
	.bind(data.external_id)
	.bind(data.email)
	.bind(data.name)
	.bind(data.avatar_url)
	.fetch_one(db)
	.await;

	map_res(res, from_row)
}

pub(crate) async fn read(db: &SqlitePool, user_id: UserId) -> ClResult<User> {
	let res = sqlx::query("SELECT * FROM users WHERE user_id=?")
		.bind(user_id.0)
		.fetch_one(db)
		.await;

	map_res(res, from_row)
}

// vim: ts=4

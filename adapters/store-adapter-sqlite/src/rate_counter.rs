//! Durable rate-counter rows, the slow path behind the in-process counters

use sqlx::SqlitePool;

use dripmail::prelude::*;

use crate::utils::*;

pub(crate) async fn bump(
	db: &SqlitePool,
	key: &str,
	window_start: Timestamp,
	window_end: Timestamp,
) -> ClResult<()> {
	sqlx::query(
		"INSERT INTO rate_counters (key, count, window_start, window_end)
		VALUES (?, 1, ?, ?)
		ON CONFLICT(key) DO UPDATE SET count=count+1",
	)
	.bind(key)
	.bind(window_start.0)
	.bind(window_end.0)
	.execute(db)
	.await
	.map_err(db_err)?;

	Ok(())
}

pub(crate) async fn prune(db: &SqlitePool, older_than: Timestamp) -> ClResult<u64> {
	let res = sqlx::query("DELETE FROM rate_counters WHERE window_end < ?")
		.bind(older_than.0)
		.execute(db)
		.await
		.map_err(db_err)?;

	Ok(res.rows_affected())
}

// vim: ts=4

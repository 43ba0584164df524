//! Job table initialization
//!
//! Timestamps in this schema are unix milliseconds; backoff arithmetic needs
//! finer grain than the second resolution used elsewhere.

use sqlx::SqlitePool;

/// Job states: W waiting, A active (leased), C completed, F failed (parked)
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS jobs (
		job_id text NOT NULL,
		payload text NOT NULL,
		priority integer NOT NULL DEFAULT 0,
		state char(1) NOT NULL DEFAULT 'W',
		run_at integer NOT NULL,
		lease_until integer,
		delivery integer NOT NULL DEFAULT 0,
		max_attempts integer NOT NULL,
		backoff_ms integer NOT NULL,
		error text,
		created_at integer NOT NULL,
		completed_at integer,
		PRIMARY KEY(job_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(state, run_at)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_completed ON jobs(state, completed_at)")
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;

	Ok(())
}

// vim: ts=4

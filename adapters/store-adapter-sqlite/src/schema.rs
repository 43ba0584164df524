//! Database schema initialization
//!
//! Creates tables and indexes on startup; statements are idempotent so the
//! adapter can be pointed at an existing database file.

use sqlx::SqlitePool;

/// Initialize the database schema with all required tables and indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Users
	//*******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS users (
		user_id integer PRIMARY KEY AUTOINCREMENT,
		external_id text NOT NULL UNIQUE,
		email text NOT NULL UNIQUE,
		name text NOT NULL,
		avatar_url text,
		created_at integer NOT NULL DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Senders
	//*********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS senders (
		sender_id integer PRIMARY KEY AUTOINCREMENT,
		user_id integer NOT NULL,
		email text NOT NULL,
		name text NOT NULL,
		smtp_host text,
		smtp_port integer,
		smtp_user text,
		smtp_secret text,
		is_default boolean NOT NULL DEFAULT 0,
		is_active boolean NOT NULL DEFAULT 1,
		created_at integer NOT NULL DEFAULT (unixepoch()),
		updated_at integer NOT NULL DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_senders_user_email ON senders(user_id, email)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_senders_user ON senders(user_id)")
		.execute(&mut *tx)
		.await?;

	// Batches
	//*********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS batches (
		batch_id integer PRIMARY KEY AUTOINCREMENT,
		user_id integer NOT NULL,
		total_emails integer NOT NULL,
		scheduled_emails integer NOT NULL DEFAULT 0,
		sent_emails integer NOT NULL DEFAULT 0,
		failed_emails integer NOT NULL DEFAULT 0,
		start_time integer NOT NULL,
		delay_secs integer NOT NULL,
		hourly_limit integer NOT NULL,
		created_at integer NOT NULL DEFAULT (unixepoch()),
		updated_at integer NOT NULL DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_user ON batches(user_id)")
		.execute(&mut *tx)
		.await?;

	// Messages
	//**********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS messages (
		message_id integer PRIMARY KEY AUTOINCREMENT,
		user_id integer NOT NULL,
		sender_id integer,
		batch_id integer NOT NULL,
		batch_index integer NOT NULL,
		recipient text NOT NULL,
		subject text NOT NULL,
		body text NOT NULL,
		status text NOT NULL DEFAULT 'SCHEDULED',
		scheduled_at integer NOT NULL,
		sent_at integer,
		error_message text,
		retry_count integer NOT NULL DEFAULT 0,
		max_retries integer NOT NULL DEFAULT 3,
		job_id text,
		provider_message_id text,
		preview_url text,
		created_at integer NOT NULL DEFAULT (unixepoch()),
		updated_at integer NOT NULL DEFAULT (unixepoch()),
		UNIQUE(batch_id, batch_index)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_scheduled ON messages(scheduled_at)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_batch ON messages(batch_id)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id)")
		.execute(&mut *tx)
		.await?;
	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_job_id ON messages(job_id)
		WHERE job_id IS NOT NULL",
	)
	.execute(&mut *tx)
	.await?;

	// Rate counters
	//***************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS rate_counters (
		key text NOT NULL,
		count integer NOT NULL DEFAULT 0,
		window_start integer NOT NULL,
		window_end integer NOT NULL,
		PRIMARY KEY(key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(())
}

// vim: ts=4

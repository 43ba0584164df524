//! SQLite implementation of the dripmail persistent delayed queue.
//!
//! Delivery semantics: a job becomes visible once `run_at` passes, is claimed
//! under a lease (`UPDATE … RETURNING`, so at most one worker holds it), and
//! is redelivered when the lease expires without an ack. Deterministic job
//! ids make re-enqueues of the same attempt no-ops. The whole table survives
//! restarts; a crashed process leaves only leases that time out.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{Row, sqlite::{self, SqlitePool}};
use std::path::Path;
use std::time::{Duration, SystemTime};

use dripmail::prelude::*;
use dripmail::queue_adapter::{
	CleanupPolicy, EnqueueOptions, EnqueueOutcome, FailOutcome, LeasedJob, QueueAdapter, SendJob,
	ThroughputCap,
};

mod schema;

fn now_ms() -> i64 {
	SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as i64
}

fn db_err(err: sqlx::Error) -> Error {
	warn!("queue DB: {:#?}", err);
	Error::QueueUnavailable(err.to_string())
}

/// Sliding dequeue-side throughput window, the optional second line of
/// defence under the hourly caps
#[derive(Debug)]
struct CapWindow {
	started_ms: i64,
	count: u32,
}

#[derive(Debug)]
pub struct QueueAdapterSqlite {
	db: SqlitePool,
	cap: Option<ThroughputCap>,
	cap_window: Mutex<CapWindow>,
}

impl QueueAdapterSqlite {
	/// Open (or create) `queue.db` under `path` and initialize the schema
	pub async fn new(path: impl AsRef<Path>) -> ClResult<Self> {
		let db_path = path.as_ref().join("queue.db");
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(&db_path)
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);

		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts)
			.await
			.map_err(db_err)?;

		schema::init_db(&db).await.map_err(db_err)?;

		Ok(Self { db, cap: None, cap_window: Mutex::new(CapWindow { started_ms: 0, count: 0 }) })
	}

	pub fn with_throughput_cap(mut self, cap: ThroughputCap) -> Self {
		self.cap = Some(cap);
		self
	}

	/// How many jobs the throughput cap still allows right now
	fn cap_allowance(&self, want: usize) -> usize {
		let Some(cap) = self.cap else { return want };
		let mut window = self.cap_window.lock();
		let now = now_ms();
		if now - window.started_ms >= cap.window.as_millis() as i64 {
			window.started_ms = now;
			window.count = 0;
		}
		want.min(cap.max.saturating_sub(window.count) as usize)
	}

	fn cap_consume(&self, n: usize) {
		if self.cap.is_some() {
			self.cap_window.lock().count += n as u32;
		}
	}

	/// `now` is passed in so a bulk enqueue shares one reference instant;
	/// jobs with equal delays then share a visibility instant and the
	/// priority tie-break is meaningful.
	async fn insert(
		&self,
		tx: &mut sqlx::SqliteConnection,
		job: &SendJob,
		opts: &EnqueueOptions,
		now: i64,
	) -> ClResult<EnqueueOutcome> {
		let job_id = job.job_id();
		let payload = serde_json::to_string(job)?;
		let res = sqlx::query(
			"INSERT INTO jobs (job_id, payload, priority, run_at, max_attempts, backoff_ms, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(job_id) DO NOTHING",
		)
		.bind(&job_id)
		.bind(&payload)
		.bind(opts.priority)
		.bind(now + opts.delay.as_millis() as i64)
		.bind(opts.max_attempts)
		.bind(opts.initial_backoff.as_millis() as i64)
		.bind(now)
		.execute(tx)
		.await
		.map_err(db_err)?;

		if res.rows_affected() == 0 {
			debug!("duplicate enqueue rejected: {}", job_id);
			Ok(EnqueueOutcome::Duplicate)
		} else {
			Ok(EnqueueOutcome::Enqueued(job_id.into()))
		}
	}
}

#[async_trait]
impl QueueAdapter for QueueAdapterSqlite {
	async fn enqueue(&self, job: &SendJob, opts: &EnqueueOptions) -> ClResult<EnqueueOutcome> {
		let mut conn = self.db.acquire().await.map_err(db_err)?;
		self.insert(&mut conn, job, opts, now_ms()).await
	}

	async fn enqueue_bulk(
		&self,
		items: &[(SendJob, EnqueueOptions)],
	) -> ClResult<Vec<EnqueueOutcome>> {
		let now = now_ms();
		let mut tx = self.db.begin().await.map_err(db_err)?;
		let mut outcomes = Vec::with_capacity(items.len());
		for (job, opts) in items {
			outcomes.push(self.insert(&mut tx, job, opts, now).await?);
		}
		tx.commit().await.map_err(db_err)?;
		Ok(outcomes)
	}

	async fn dequeue(&self, max: usize, lease: Duration) -> ClResult<Vec<LeasedJob>> {
		let max = self.cap_allowance(max);
		if max == 0 {
			return Ok(Vec::new());
		}

		let now = now_ms();
		let rows = sqlx::query(
			"UPDATE jobs SET state='A', delivery=delivery+1, lease_until=?
			WHERE job_id IN (
				SELECT job_id FROM jobs
				WHERE (state='W' AND run_at<=?) OR (state='A' AND lease_until<=?)
				ORDER BY run_at, priority, rowid
				LIMIT ?
			)
			RETURNING job_id, payload, delivery, run_at, priority, rowid",
		)
		.bind(now + lease.as_millis() as i64)
		.bind(now)
		.bind(now)
		.bind(max as i64)
		.fetch_all(&self.db)
		.await
		.map_err(db_err)?;

		// RETURNING row order is unspecified; re-establish the delivery
		// order (visibility instant, then priority, then FIFO)
		let mut claimed = Vec::with_capacity(rows.len());
		for row in rows {
			let job_id: Box<str> = row.try_get("job_id").map_err(db_err)?;
			let payload: &str = row.try_get("payload").map_err(db_err)?;
			let delivery: u32 = row.try_get("delivery").map_err(db_err)?;
			let run_at: i64 = row.try_get("run_at").map_err(db_err)?;
			let priority: i32 = row.try_get("priority").map_err(db_err)?;
			let seq: i64 = row.try_get("rowid").map_err(db_err)?;
			let job: SendJob = serde_json::from_str(payload)?;
			claimed.push(((run_at, priority, seq), LeasedJob { job_id, job, delivery }));
		}
		claimed.sort_by_key(|(key, _)| *key);
		let leased: Vec<LeasedJob> = claimed.into_iter().map(|(_, job)| job).collect();
		self.cap_consume(leased.len());

		Ok(leased)
	}

	async fn complete(&self, job_id: &str) -> ClResult<()> {
		sqlx::query(
			"UPDATE jobs SET state='C', completed_at=?, lease_until=NULL
			WHERE job_id=? AND state='A'",
		)
		.bind(now_ms())
		.bind(job_id)
		.execute(&self.db)
		.await
		.map_err(db_err)?;

		Ok(())
	}

	async fn fail(&self, job_id: &str, error: &str) -> ClResult<FailOutcome> {
		let row = sqlx::query(
			"SELECT delivery, max_attempts, backoff_ms FROM jobs WHERE job_id=? AND state='A'",
		)
		.bind(job_id)
		.fetch_optional(&self.db)
		.await
		.map_err(db_err)?
		.ok_or(Error::NotFound)?;

		let delivery: u32 = row.try_get("delivery").map_err(db_err)?;
		let max_attempts: u32 = row.try_get("max_attempts").map_err(db_err)?;
		let backoff_ms: i64 = row.try_get("backoff_ms").map_err(db_err)?;

		if delivery >= max_attempts {
			sqlx::query(
				"UPDATE jobs SET state='F', error=?, completed_at=?, lease_until=NULL
				WHERE job_id=? AND state='A'",
			)
			.bind(error)
			.bind(now_ms())
			.bind(job_id)
			.execute(&self.db)
			.await
			.map_err(db_err)?;
			return Ok(FailOutcome::Parked);
		}

		// Exponential: initial * 2^(delivery-1), so the first retry waits
		// exactly the initial backoff
		let exp = delivery.saturating_sub(1).min(20);
		let delay_ms = backoff_ms.saturating_mul(1i64 << exp);
		sqlx::query(
			"UPDATE jobs SET state='W', error=?, run_at=?, lease_until=NULL
			WHERE job_id=? AND state='A'",
		)
		.bind(error)
		.bind(now_ms() + delay_ms)
		.bind(job_id)
		.execute(&self.db)
		.await
		.map_err(db_err)?;

		Ok(FailOutcome::Retrying { delay: Duration::from_millis(delay_ms as u64) })
	}

	async fn cleanup(&self, policy: &CleanupPolicy) -> ClResult<u64> {
		let now = now_ms();
		let mut removed = 0;

		let res = sqlx::query("DELETE FROM jobs WHERE state='C' AND completed_at < ?")
			.bind(now - policy.keep_completed.as_millis() as i64)
			.execute(&self.db)
			.await
			.map_err(db_err)?;
		removed += res.rows_affected();

		let res = sqlx::query(
			"DELETE FROM jobs WHERE state='C' AND job_id NOT IN (
				SELECT job_id FROM jobs WHERE state='C' ORDER BY completed_at DESC LIMIT ?
			)",
		)
		.bind(policy.keep_completed_max as i64)
		.execute(&self.db)
		.await
		.map_err(db_err)?;
		removed += res.rows_affected();

		let res = sqlx::query("DELETE FROM jobs WHERE state='F' AND completed_at < ?")
			.bind(now - policy.keep_failed.as_millis() as i64)
			.execute(&self.db)
			.await
			.map_err(db_err)?;
		removed += res.rows_affected();

		Ok(removed)
	}

	async fn pending_count(&self) -> ClResult<u64> {
		let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE state IN ('W', 'A')")
			.fetch_one(&self.db)
			.await
			.map_err(db_err)?
			.try_get("n")
			.map_err(db_err)?;

		Ok(n as u64)
	}
}

// vim: ts=4

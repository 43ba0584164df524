//! Process configuration, parsed once from the environment and frozen

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL};
use rand::RngExt;
use std::env;
use std::str::FromStr;

use dripmail_types::transport_adapter::SmtpConfig;

use crate::email::planner::HourBucket;
use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Config {
	pub listen: Box<str>,
	pub frontend_origin: Box<str>,
	/// Directory holding the SQLite files (store.db, queue.db)
	pub database_dir: Box<str>,
	pub jwt_secret: Box<str>,
	pub jwt_expiry_secs: i64,
	pub google_client_id: Option<Box<str>>,
	pub google_client_secret: Option<Box<str>>,
	pub google_callback_url: Option<Box<str>>,
	pub worker_concurrency: usize,
	pub max_retries: u32,
	pub initial_retry_delay_ms: u64,
	pub global_hourly_limit: u32,
	pub sender_hourly_limit: u32,
	/// Inter-message delay applied when a schedule request omits one
	pub default_delay_ms: u64,
	pub planner_hour_bucket: HourBucket,
	pub shutdown_grace_secs: u64,
	/// Process-wide relay for senders without private SMTP settings
	pub smtp: Option<SmtpConfig>,
}

fn var(name: &str) -> Option<String> {
	env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> ClResult<T> {
	match var(name) {
		Some(v) => v.parse().map_err(|_| Error::Validation(format!("invalid {}: {}", name, v))),
		None => Ok(default),
	}
}

fn generated_secret() -> String {
	let bytes: [u8; 32] = rand::rng().random();
	BASE64_URL.encode(bytes)
}

impl Config {
	pub fn from_env() -> ClResult<Config> {
		let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
			warn!("JWT_SECRET not set; generated an ephemeral secret (sessions reset on restart)");
			generated_secret()
		});

		let smtp = var("SMTP_HOST")
			.map(|host| -> ClResult<SmtpConfig> {
				let port: u16 = parse_var("SMTP_PORT", 587)?;
				Ok(SmtpConfig {
					host: host.into(),
					port,
					secure: parse_var("SMTP_SECURE", port == 465)?,
					user: var("SMTP_USER").unwrap_or_default().into(),
					secret: var("SMTP_SECRET").unwrap_or_default().into(),
				})
			})
			.transpose()?;
		if smtp.is_none() {
			warn!("SMTP_HOST not set; outbound mail uses the preview transport");
		}

		Ok(Config {
			listen: var("LISTEN").unwrap_or_else(|| "127.0.0.1:3001".into()).into(),
			frontend_origin: var("FRONTEND_ORIGIN")
				.unwrap_or_else(|| "http://localhost:3000".into())
				.into(),
			database_dir: var("DATABASE_DIR").unwrap_or_else(|| "./data".into()).into(),
			jwt_secret: jwt_secret.into(),
			jwt_expiry_secs: parse_var("JWT_EXPIRY_SECS", 7 * 24 * 3600)?,
			google_client_id: var("GOOGLE_CLIENT_ID").map(Into::into),
			google_client_secret: var("GOOGLE_CLIENT_SECRET").map(Into::into),
			google_callback_url: var("GOOGLE_CALLBACK_URL").map(Into::into),
			worker_concurrency: parse_var("WORKER_CONCURRENCY", 5)?,
			max_retries: parse_var("MAX_RETRIES", 3)?,
			initial_retry_delay_ms: parse_var("INITIAL_RETRY_DELAY_MS", 60_000)?,
			global_hourly_limit: parse_var("GLOBAL_HOURLY_LIMIT", 100)?,
			sender_hourly_limit: parse_var("SENDER_HOURLY_LIMIT", 50)?,
			default_delay_ms: parse_var("DEFAULT_DELAY_MS", 5_000)?,
			planner_hour_bucket: parse_var("PLANNER_HOUR_BUCKET", HourBucket::Utc)?,
			shutdown_grace_secs: parse_var("SHUTDOWN_GRACE_SECS", 30)?,
			smtp,
		})
	}
}

// vim: ts=4

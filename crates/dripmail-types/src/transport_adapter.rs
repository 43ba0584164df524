//! Adapter that delivers a single rendered message to the outside world.
//!
//! The core never talks SMTP itself; it sees the transport only as a send
//! capability returning a provider message id and, for diagnostic
//! transports, a preview URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::prelude::*;

/// Connection settings for one outbound SMTP relay.
///
/// Pooled transports are keyed by `(host, port, user)`, so two senders
/// sharing a relay account share a connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
	pub host: Box<str>,
	pub port: u16,
	/// Implicit TLS (SMTPS) instead of STARTTLS
	pub secure: bool,
	pub user: Box<str>,
	pub secret: Box<str>,
}

impl SmtpConfig {
	/// Pool key: one pooled connection per unique `(host, port, user)`
	pub fn pool_key(&self) -> (Box<str>, u16, Box<str>) {
		(self.host.clone(), self.port, self.user.clone())
	}
}

/// One outbound message, fully rendered
#[derive(Debug, Clone)]
pub struct Envelope {
	pub from_name: Box<str>,
	pub from_email: Box<str>,
	pub to: Box<str>,
	pub subject: Box<str>,
	pub html: Box<str>,
	/// Plain-text alternative derived from `html`
	pub text: Box<str>,
}

impl Envelope {
	/// `"<name>" <email>` rendering for the From header
	pub fn from_header(&self) -> String {
		format!("\"{}\" <{}>", self.from_name, self.from_email)
	}
}

/// Successful send result
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
	pub message_id: Option<Box<str>>,
	pub preview_url: Option<Box<str>>,
}

#[async_trait]
pub trait TransportAdapter: Send + Sync {
	/// Deliver one envelope through the relay described by `config`; `None`
	/// means no relay is configured for the sender or the process, which
	/// diagnostic transports tolerate. Failures are reported as
	/// `Error::TransportFailure` and are retryable from the worker's point
	/// of view.
	async fn send(&self, config: Option<&SmtpConfig>, envelope: &Envelope) -> ClResult<SendReceipt>;

	/// Flush and drop all pooled connections
	async fn close(&self);
}

// vim: ts=4

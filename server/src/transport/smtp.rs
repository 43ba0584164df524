//! SMTP transport using lettre
//!
//! Transports are pooled per `(host, port, user)` tuple and verified with an
//! SMTP handshake on first use, so a sender with broken credentials fails at
//! send time instead of poisoning the pool.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use dripmail_types::transport_adapter::{Envelope, SendReceipt, SmtpConfig, TransportAdapter};

use crate::prelude::*;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

type PoolKey = (Box<str>, u16, Box<str>);
type PooledTransport = Arc<AsyncSmtpTransport<Tokio1Executor>>;

#[derive(Default)]
pub struct SmtpTransportAdapter {
	pool: Mutex<HashMap<PoolKey, PooledTransport>>,
}

impl SmtpTransportAdapter {
	pub fn new() -> Self {
		Self::default()
	}

	fn build_transport(config: &SmtpConfig) -> ClResult<PooledTransport> {
		let tls_params = TlsParameters::new(config.host.to_string())
			.map_err(|e| Error::TransportFailure(format!("TLS configuration error: {}", e)))?;
		let tls = if config.secure {
			Tls::Wrapper(tls_params)
		} else {
			Tls::Opportunistic(tls_params)
		};

		let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&*config.host)
			.port(config.port)
			.tls(tls)
			.credentials(Credentials::new(config.user.to_string(), config.secret.to_string()))
			.timeout(Some(SMTP_TIMEOUT))
			.build();

		Ok(Arc::new(transport))
	}

	/// Pooled transport for the config's `(host, port, user)` tuple,
	/// handshake-verified when first created
	async fn transport_for(&self, config: &SmtpConfig) -> ClResult<PooledTransport> {
		let key = config.pool_key();
		if let Some(transport) = self.pool.lock().get(&key) {
			return Ok(transport.clone());
		}

		let transport = Self::build_transport(config)?;
		let verified = transport
			.test_connection()
			.await
			.map_err(|e| Error::TransportFailure(format!("SMTP connection failed: {}", e)))?;
		if !verified {
			return Err(Error::TransportFailure(format!(
				"SMTP server {}:{} rejected the connection",
				config.host, config.port
			)));
		}
		debug!("SMTP connection verified for {}:{} as {}", config.host, config.port, config.user);

		self.pool.lock().entry(key).or_insert_with(|| transport.clone());
		Ok(transport)
	}

	fn build_message(envelope: &Envelope, message_id: &str) -> ClResult<Message> {
		let from: Mailbox = envelope
			.from_header()
			.parse()
			.map_err(|_| Error::Validation("invalid from address".into()))?;
		let to: Mailbox = envelope
			.to
			.parse()
			.map_err(|_| Error::Validation("invalid recipient address".into()))?;

		Message::builder()
			.from(from)
			.to(to)
			.subject(&*envelope.subject)
			.message_id(Some(message_id.to_string()))
			.multipart(
				MultiPart::alternative()
					.singlepart(SinglePart::plain(envelope.text.to_string()))
					.singlepart(SinglePart::html(envelope.html.to_string())),
			)
			.map_err(|e| Error::Validation(format!("failed to build email: {}", e)))
	}
}

#[async_trait]
impl TransportAdapter for SmtpTransportAdapter {
	async fn send(
		&self,
		config: Option<&SmtpConfig>,
		envelope: &Envelope,
	) -> ClResult<SendReceipt> {
		let Some(config) = config else {
			return Err(Error::TransportFailure("no SMTP configuration available".into()));
		};

		let message_id = format!("<{}@{}>", Uuid::new_v4(), config.host);
		let email = Self::build_message(envelope, &message_id)?;
		let transport = self.transport_for(config).await?;

		match transport.send(email).await {
			Ok(response) => {
				debug!("SMTP accepted {} for {}: {:?}", message_id, envelope.to, response.code());
				Ok(SendReceipt { message_id: Some(message_id.into()), preview_url: None })
			}
			Err(e) => {
				warn!("SMTP send to {} failed: {}", envelope.to, e);
				Err(Error::TransportFailure(format!("SMTP send failed: {}", e)))
			}
		}
	}

	async fn close(&self) {
		let drained = {
			let mut pool = self.pool.lock();
			let n = pool.len();
			pool.clear();
			n
		};
		if drained > 0 {
			info!("closed {} pooled SMTP transport(s)", drained);
		}
	}
}


// vim: ts=4

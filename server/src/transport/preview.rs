//! Preview transport: no network I/O, fabricated receipts
//!
//! Used in development when no SMTP relay is configured. Each "send" is
//! logged and answered with a preview URL for manual inspection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use dripmail_types::transport_adapter::{Envelope, SendReceipt, SmtpConfig, TransportAdapter};

use crate::prelude::*;

#[derive(Debug, Default)]
pub struct PreviewTransport {
	delivered: AtomicU64,
}

impl PreviewTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn delivered(&self) -> u64 {
		self.delivered.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl TransportAdapter for PreviewTransport {
	async fn send(
		&self,
		_config: Option<&SmtpConfig>,
		envelope: &Envelope,
	) -> ClResult<SendReceipt> {
		let id = Uuid::new_v4();
		self.delivered.fetch_add(1, Ordering::Relaxed);
		info!(
			"preview send from {} to {} subject {:?}",
			envelope.from_header(),
			envelope.to,
			envelope.subject
		);

		Ok(SendReceipt {
			message_id: Some(format!("<{}@preview.dripmail>", id).into()),
			preview_url: Some(format!("https://preview.dripmail.invalid/{}", id).into()),
		})
	}

	async fn close(&self) {}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_preview_send_fabricates_receipt() {
		let transport = PreviewTransport::new();
		let envelope = Envelope {
			from_name: "Alice".into(),
			from_email: "alice@corp.com".into(),
			to: "bob@example.com".into(),
			subject: "hello".into(),
			html: "<p>hi</p>".into(),
			text: "hi".into(),
		};

		let receipt = transport.send(None, &envelope).await.unwrap();
		assert!(receipt.message_id.is_some());
		assert!(receipt.preview_url.is_some());
		assert_eq!(transport.delivered(), 1);
	}
}

// vim: ts=4

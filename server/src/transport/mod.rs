//! Outbound mail transports: pooled SMTP for production, a preview
//! transport for development and tests

mod preview;
mod smtp;

pub use preview::PreviewTransport;
pub use smtp::SmtpTransportAdapter;

// vim: ts=4

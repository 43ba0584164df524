//! Adapter that resolves an OAuth authorization code into an identity.
//!
//! The core only consumes the resolved identity; the provider-specific
//! dance (redirects, token exchange, userinfo) lives behind this trait.

use async_trait::async_trait;

use crate::prelude::*;

/// Identity attributes returned by the provider after a successful exchange
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
	pub external_id: Box<str>,
	pub email: Box<str>,
	pub name: Box<str>,
	pub avatar_url: Option<Box<str>>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
	/// URL the browser is redirected to in order to start the flow.
	/// `state` is an opaque CSRF token round-tripped by the provider.
	fn authorize_url(&self, state: &str) -> ClResult<Box<str>>;

	/// Exchange the callback `code` for the user's identity
	async fn resolve_code(&self, code: &str) -> ClResult<ResolvedIdentity>;
}

// vim: ts=4

//! Google OAuth identity provider
//!
//! Implements the code-exchange side of the flow: the browser is redirected
//! to Google's consent screen, and the callback code is traded for an access
//! token and the userinfo claims the core consumes.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, header};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use url::{Url, form_urlencoded};

use dripmail_types::identity_provider_adapter::{IdentityProvider, ResolvedIdentity};

use crate::prelude::*;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Deserialize)]
struct TokenResponse {
	access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
	sub: String,
	email: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	picture: Option<String>,
}

pub struct GoogleIdentityProvider {
	client_id: Box<str>,
	client_secret: Box<str>,
	callback_url: Box<str>,
	client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl GoogleIdentityProvider {
	pub fn new(
		client_id: impl Into<Box<str>>,
		client_secret: impl Into<Box<str>>,
		callback_url: impl Into<Box<str>>,
	) -> ClResult<Self> {
		let _ = rustls::crypto::ring::default_provider().install_default();
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|_| Error::Internal("no native root CA certificates found".into()))?
			.https_only()
			.enable_http1()
			.build();

		Ok(Self {
			client_id: client_id.into(),
			client_secret: client_secret.into(),
			callback_url: callback_url.into(),
			client: Client::builder(TokioExecutor::new()).build(connector),
		})
	}

	async fn timed_request(
		&self,
		req: Request<Full<Bytes>>,
	) -> ClResult<hyper::Response<hyper::body::Incoming>> {
		timeout(REQUEST_TIMEOUT, self.client.request(req))
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|err| {
				warn!("oauth http request failed: {}", err);
				Error::Internal("identity provider unreachable".into())
			})
	}

	async fn collect_body(body: hyper::body::Incoming) -> ClResult<Bytes> {
		timeout(REQUEST_TIMEOUT, body.collect())
			.await
			.map_err(|_| Error::Timeout)?
			.map(|collected| collected.to_bytes())
			.map_err(|err| {
				warn!("oauth response read failed: {}", err);
				Error::Internal("identity provider unreachable".into())
			})
	}
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
	fn authorize_url(&self, state: &str) -> ClResult<Box<str>> {
		let url = Url::parse_with_params(
			AUTH_ENDPOINT,
			&[
				("client_id", &*self.client_id),
				("redirect_uri", &*self.callback_url),
				("response_type", "code"),
				("scope", "openid email profile"),
				("state", state),
				("prompt", "select_account"),
			],
		)
		.map_err(|_| Error::Internal("invalid oauth configuration".into()))?;

		Ok(url.as_str().into())
	}

	async fn resolve_code(&self, code: &str) -> ClResult<ResolvedIdentity> {
		// Authorization code -> access token
		let form = form_urlencoded::Serializer::new(String::new())
			.append_pair("code", code)
			.append_pair("client_id", &self.client_id)
			.append_pair("client_secret", &self.client_secret)
			.append_pair("redirect_uri", &self.callback_url)
			.append_pair("grant_type", "authorization_code")
			.finish();
		let req = Request::builder()
			.method(Method::POST)
			.uri(TOKEN_ENDPOINT)
			.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
			.body(Full::new(Bytes::from(form)))?;

		let res = self.timed_request(req).await?;
		if !res.status().is_success() {
			warn!("oauth code exchange rejected: {}", res.status());
			return Err(Error::Unauthorized);
		}
		let token: TokenResponse =
			serde_json::from_slice(&Self::collect_body(res.into_body()).await?)?;

		// Access token -> identity claims
		let req = Request::builder()
			.method(Method::GET)
			.uri(USERINFO_ENDPOINT)
			.header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
			.body(Full::new(Bytes::new()))?;

		let res = self.timed_request(req).await?;
		if !res.status().is_success() {
			warn!("oauth userinfo rejected: {}", res.status());
			return Err(Error::Unauthorized);
		}
		let info: UserInfo = serde_json::from_slice(&Self::collect_body(res.into_body()).await?)?;

		Ok(ResolvedIdentity {
			external_id: info.sub.into(),
			name: info.name.unwrap_or_else(|| info.email.clone()).into(),
			email: info.email.into(),
			avatar_url: info.picture.map(Into::into),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_authorize_url_carries_state_and_callback() {
		let idp = GoogleIdentityProvider::new(
			"client-1",
			"secret-1",
			"https://api.example.com/auth/google/callback",
		)
		.unwrap();

		let url = idp.authorize_url("state-xyz").unwrap();
		assert!(url.starts_with(AUTH_ENDPOINT));
		assert!(url.contains("state=state-xyz"));
		assert!(url.contains("client_id=client-1"));
		assert!(url.contains("response_type=code"));
		assert!(!url.contains("secret-1"), "client secret must never leak into the redirect");
	}
}

// vim: ts=4

//! Custom middlewares

use axum::{
	body::Body,
	extract::State,
	http::{HeaderMap, Request, header},
	middleware::Next,
	response::Response,
};

use crate::auth::{AuthCtx, token};
use crate::core::Auth;
use crate::prelude::*;

/// Token from an `Authorization: Bearer` header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	value.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

/// Value of a named cookie
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
	let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
	cookies
		.split(';')
		.map(str::trim)
		.find_map(|pair| pair.strip_prefix(name)?.strip_prefix('=').map(str::to_string))
}

/// Require a valid session token (bearer header or `token` cookie) and
/// thread the authenticated principal through request extensions
pub async fn require_auth(
	State(app): State<App>,
	mut req: Request<Body>,
	next: Next,
) -> ClResult<Response> {
	let token = bearer_token(req.headers())
		.or_else(|| cookie_value(req.headers(), "token"))
		.ok_or(Error::Unauthorized)?;

	let claims = token::validate(&app.config.jwt_secret, &token)?;
	let auth = AuthCtx { user_id: UserId(claims.sub), email: claims.email.into() };
	req.extensions_mut().insert(Auth(auth));

	Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;

	#[test]
	fn test_cookie_value_parsing() {
		let mut headers = HeaderMap::new();
		headers.insert(
			header::COOKIE,
			HeaderValue::from_static("a=1; token=abc.def.ghi; other=x"),
		);
		assert_eq!(cookie_value(&headers, "token").as_deref(), Some("abc.def.ghi"));
		assert_eq!(cookie_value(&headers, "missing"), None);
		// Prefix of another cookie name must not match
		assert_eq!(cookie_value(&headers, "toke"), None);
	}

	#[test]
	fn test_bearer_token_parsing() {
		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok123 "));
		assert_eq!(bearer_token(&headers).as_deref(), Some("tok123"));

		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
		assert_eq!(bearer_token(&headers), None);
	}
}

// vim: ts=4

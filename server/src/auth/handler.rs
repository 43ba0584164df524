//! Login flow and session handlers

use axum::{
	Json,
	extract::{Query, State},
	http::{HeaderMap, HeaderValue, header},
	response::Redirect,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL};
use rand::RngExt;
use serde::Deserialize;

use dripmail_types::identity_provider_adapter::IdentityProvider;
use dripmail_types::store_adapter::{UpsertUser, User};
use dripmail_types::types::ApiResponse;

use crate::auth::token;
use crate::core::extract::Auth;
use crate::core::middleware::cookie_value;
use crate::prelude::*;

/// CSRF state round-tripped through the provider
fn generate_state() -> String {
	let bytes: [u8; 24] = rand::rng().random();
	BASE64_URL.encode(bytes)
}

fn set_cookie(headers: &mut HeaderMap, cookie: &str) -> ClResult<()> {
	headers.append(
		header::SET_COOKIE,
		HeaderValue::from_str(cookie).map_err(|_| Error::Internal("invalid cookie value".into()))?,
	);
	Ok(())
}

/// GET /auth/google - start the OAuth flow
pub async fn get_google(State(app): State<App>) -> ClResult<(HeaderMap, Redirect)> {
	let idp = app
		.idp
		.as_ref()
		.ok_or_else(|| Error::Internal("identity provider not configured".into()))?;

	let state = generate_state();
	let url = idp.authorize_url(&state)?;

	let mut headers = HeaderMap::new();
	set_cookie(
		&mut headers,
		&format!("oauth_state={}; Path=/; Max-Age=600; HttpOnly; SameSite=Lax", state),
	)?;

	Ok((headers, Redirect::temporary(&url)))
}

#[derive(Deserialize)]
pub struct CallbackQuery {
	code: String,
	state: String,
}

/// GET /auth/google/callback - finish the OAuth flow, upsert the user,
/// issue the session cookie, and bounce back to the frontend
pub async fn get_google_callback(
	State(app): State<App>,
	Query(query): Query<CallbackQuery>,
	headers: HeaderMap,
) -> ClResult<(HeaderMap, Redirect)> {
	let idp = app
		.idp
		.as_ref()
		.ok_or_else(|| Error::Internal("identity provider not configured".into()))?;

	let expected = cookie_value(&headers, "oauth_state").ok_or(Error::Unauthorized)?;
	if expected != query.state {
		warn!("oauth state mismatch");
		return Err(Error::Unauthorized);
	}

	let identity = idp.resolve_code(&query.code).await?;
	let user = app
		.store
		.upsert_user(&UpsertUser {
			external_id: &identity.external_id,
			email: &identity.email,
			name: &identity.name,
			avatar_url: identity.avatar_url.as_deref(),
		})
		.await?;
	info!("user {} logged in as {}", user.id, user.email);

	let session = token::issue(
		&app.config.jwt_secret,
		user.id,
		&user.email,
		app.config.jwt_expiry_secs,
	)?;

	let mut out = HeaderMap::new();
	set_cookie(&mut out, "oauth_state=; Path=/; Max-Age=0; HttpOnly")?;
	set_cookie(
		&mut out,
		&format!(
			"token={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
			session, app.config.jwt_expiry_secs
		),
	)?;

	Ok((out, Redirect::temporary(&app.config.frontend_origin)))
}

/// GET /auth/me - current user
pub async fn get_me(State(app): State<App>, Auth(auth): Auth) -> ClResult<Json<ApiResponse<User>>> {
	let user = app.store.read_user(auth.user_id).await?;
	Ok(Json(ApiResponse::new(user)))
}

/// POST /auth/logout - end the session
pub async fn post_logout(Auth(auth): Auth) -> ClResult<(HeaderMap, Json<ApiResponse<()>>)> {
	debug!("user {} logged out", auth.user_id);
	let mut headers = HeaderMap::new();
	set_cookie(&mut headers, "token=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")?;
	Ok((headers, Json(ApiResponse::message_only("logged out"))))
}

// vim: ts=4

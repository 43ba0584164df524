//! Sender CRUD handlers

use axum::{
	Json,
	extract::{Path, State},
	http::StatusCode,
};
use serde::Deserialize;

use dripmail_types::store_adapter::{CreateSender, Sender, StoreAdapter, UpdateSender};
use dripmail_types::types::ApiResponse;

use crate::core::extract::Auth;
use crate::prelude::*;

fn validate_email(email: &str) -> ClResult<()> {
	if email.contains('@') && email.len() >= 3 {
		Ok(())
	} else {
		Err(Error::Validation(format!("invalid email address: {}", email)))
	}
}

/// GET /senders - list the user's senders, default first
pub async fn list_senders(
	State(app): State<App>,
	Auth(auth): Auth,
) -> ClResult<Json<ApiResponse<Vec<Sender>>>> {
	let senders = app.store.list_senders(auth.user_id).await?;
	Ok(Json(ApiResponse::new(senders)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSenderRequest {
	pub email: String,
	pub name: String,
	pub smtp_host: Option<String>,
	pub smtp_port: Option<u16>,
	pub smtp_user: Option<String>,
	pub smtp_secret: Option<String>,
	#[serde(default)]
	pub is_default: bool,
}

/// POST /senders
pub async fn post_sender(
	State(app): State<App>,
	Auth(auth): Auth,
	Json(req): Json<CreateSenderRequest>,
) -> ClResult<(StatusCode, Json<ApiResponse<Sender>>)> {
	validate_email(&req.email)?;
	if req.name.trim().is_empty() {
		return Err(Error::Validation("sender name must not be empty".into()));
	}

	let sender = app
		.store
		.create_sender(
			auth.user_id,
			&CreateSender {
				email: &req.email,
				name: &req.name,
				smtp_host: req.smtp_host.as_deref(),
				smtp_port: req.smtp_port,
				smtp_user: req.smtp_user.as_deref(),
				smtp_secret: req.smtp_secret.as_deref(),
				is_default: req.is_default,
			},
		)
		.await?;

	Ok((StatusCode::CREATED, Json(ApiResponse::new(sender))))
}

/// GET /senders/{sender_id}
pub async fn get_sender(
	State(app): State<App>,
	Auth(auth): Auth,
	Path(sender_id): Path<i64>,
) -> ClResult<Json<ApiResponse<Sender>>> {
	let sender = app.store.read_sender(auth.user_id, SenderId(sender_id)).await?;
	Ok(Json(ApiResponse::new(sender)))
}

/// PUT /senders/{sender_id} - partial update with PATCH semantics
pub async fn put_sender(
	State(app): State<App>,
	Auth(auth): Auth,
	Path(sender_id): Path<i64>,
	Json(patch): Json<UpdateSender>,
) -> ClResult<Json<ApiResponse<Sender>>> {
	if let Patch::Value(email) = &patch.email {
		validate_email(email)?;
	}
	if let Patch::Null = patch.email {
		return Err(Error::Validation("sender email cannot be removed".into()));
	}

	let sender = app.store.update_sender(auth.user_id, SenderId(sender_id), &patch).await?;
	Ok(Json(ApiResponse::new(sender)))
}

/// DELETE /senders/{sender_id}
pub async fn delete_sender(
	State(app): State<App>,
	Auth(auth): Auth,
	Path(sender_id): Path<i64>,
) -> ClResult<Json<ApiResponse<()>>> {
	app.store.delete_sender(auth.user_id, SenderId(sender_id)).await?;
	Ok(Json(ApiResponse::message_only("sender deleted")))
}

// vim: ts=4

//! Email scheduling and listing handlers
//!
//! Validation lives here at the HTTP edge; the coordinator and workers
//! receive structurally valid inputs.

use axum::{
	Json,
	extract::{Path, Query, State},
	http::StatusCode,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use dripmail_types::store_adapter::{ListMessageOptions, Message, MessageStats, StoreAdapter};
use dripmail_types::types::ApiResponse;

use crate::core::extract::Auth;
use crate::email::coordinator::ScheduleBatch;
use crate::prelude::*;

const MAX_DELAY_SECS: u32 = 3600;
const MAX_HOURLY_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEmailRequest {
	pub subject: String,
	pub body: String,
	pub recipients: Vec<String>,
	/// ISO-8601 start instant
	pub start_time: String,
	pub delay_between_emails: Option<u32>,
	pub hourly_limit: u32,
	pub sender_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
	pub batch_id: BatchId,
	pub total_emails: u32,
	pub scheduled_emails: Vec<Message>,
}

fn validate_schedule(req: &ScheduleEmailRequest, default_delay_secs: u32) -> ClResult<(Timestamp, u32)> {
	if req.subject.trim().is_empty() {
		return Err(Error::Validation("subject must not be empty".into()));
	}
	if req.body.trim().is_empty() {
		return Err(Error::Validation("body must not be empty".into()));
	}
	if req.recipients.is_empty() {
		return Err(Error::Validation("at least one recipient is required".into()));
	}
	for recipient in &req.recipients {
		if !recipient.contains('@') || recipient.len() < 3 {
			return Err(Error::Validation(format!("invalid recipient address: {}", recipient)));
		}
	}

	let delay = req.delay_between_emails.unwrap_or(default_delay_secs);
	if delay > MAX_DELAY_SECS {
		return Err(Error::Validation(format!(
			"delayBetweenEmails must be between 0 and {} seconds",
			MAX_DELAY_SECS
		)));
	}
	if req.hourly_limit == 0 || req.hourly_limit > MAX_HOURLY_LIMIT {
		return Err(Error::Validation(format!(
			"hourlyLimit must be between 1 and {}",
			MAX_HOURLY_LIMIT
		)));
	}

	let start = DateTime::parse_from_rfc3339(&req.start_time)
		.map_err(|_| Error::Validation(format!("invalid startTime: {}", req.start_time)))?;

	Ok((Timestamp(start.timestamp()), delay))
}

/// POST /emails/schedule - submit a batch
pub async fn post_schedule(
	State(app): State<App>,
	Auth(auth): Auth,
	Json(req): Json<ScheduleEmailRequest>,
) -> ClResult<(StatusCode, Json<ApiResponse<ScheduleResponse>>)> {
	let default_delay_secs = (app.config.default_delay_ms / 1000) as u32;
	let (start_time, delay_secs) = validate_schedule(&req, default_delay_secs)?;

	let scheduled = app
		.coordinator
		.schedule_batch(
			auth.user_id,
			&ScheduleBatch {
				subject: req.subject,
				body: req.body,
				recipients: req.recipients,
				start_time,
				delay_secs,
				hourly_limit: req.hourly_limit,
				sender_id: req.sender_id.map(SenderId),
			},
		)
		.await?;

	let response = ScheduleResponse {
		batch_id: scheduled.batch.id,
		total_emails: scheduled.batch.total_emails,
		scheduled_emails: scheduled.messages,
	};
	Ok((StatusCode::CREATED, Json(ApiResponse::new(response))))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
	pub status: Option<String>,
	pub page: Option<u32>,
	pub limit: Option<u32>,
	pub sort_by: Option<String>,
	pub sort_order: Option<String>,
}

fn list_options(
	query: &ListQuery,
	default_statuses: &[MessageStatus],
) -> ClResult<ListMessageOptions> {
	let statuses = match &query.status {
		Some(status) => vec![status.parse()?],
		None => default_statuses.to_vec(),
	};

	Ok(ListMessageOptions {
		statuses: Some(statuses),
		page: query.page.unwrap_or(1).max(1),
		limit: query.limit.unwrap_or(20).clamp(1, 100),
		sort_by: query.sort_by.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
		sort_order: query.sort_order.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
	})
}

async fn list_messages(
	app: &App,
	user_id: UserId,
	query: &ListQuery,
	default_statuses: &[MessageStatus],
) -> ClResult<Json<ApiResponse<Vec<Message>>>> {
	let opts = list_options(query, default_statuses)?;
	let (messages, total) = app.store.list_messages(user_id, &opts).await?;
	Ok(Json(ApiResponse::with_pagination(messages, opts.page, opts.limit, total)))
}

/// GET /emails/scheduled - non-terminal messages
pub async fn get_scheduled(
	State(app): State<App>,
	Auth(auth): Auth,
	Query(query): Query<ListQuery>,
) -> ClResult<Json<ApiResponse<Vec<Message>>>> {
	list_messages(
		&app,
		auth.user_id,
		&query,
		&[MessageStatus::Scheduled, MessageStatus::Processing, MessageStatus::RateLimited],
	)
	.await
}

/// GET /emails/sent - terminal messages
pub async fn get_sent(
	State(app): State<App>,
	Auth(auth): Auth,
	Query(query): Query<ListQuery>,
) -> ClResult<Json<ApiResponse<Vec<Message>>>> {
	list_messages(&app, auth.user_id, &query, &[MessageStatus::Sent, MessageStatus::Failed]).await
}

/// GET /emails/stats - per-user counts by status
pub async fn get_stats(
	State(app): State<App>,
	Auth(auth): Auth,
) -> ClResult<Json<ApiResponse<MessageStats>>> {
	let stats = app.store.message_stats(auth.user_id).await?;
	Ok(Json(ApiResponse::new(stats)))
}

/// GET /emails/{message_id}
pub async fn get_message(
	State(app): State<App>,
	Auth(auth): Auth,
	Path(message_id): Path<i64>,
) -> ClResult<Json<ApiResponse<Message>>> {
	let message = app.store.read_message(auth.user_id, MessageId(message_id)).await?;
	Ok(Json(ApiResponse::new(message)))
}

/// DELETE /emails/{message_id} - cancel (hard delete)
///
/// The scheduled queue job still fires but finds no row and drops itself.
pub async fn delete_message(
	State(app): State<App>,
	Auth(auth): Auth,
	Path(message_id): Path<i64>,
) -> ClResult<Json<ApiResponse<()>>> {
	app.store.delete_message(auth.user_id, MessageId(message_id)).await?;
	Ok(Json(ApiResponse::message_only("message cancelled")))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request() -> ScheduleEmailRequest {
		ScheduleEmailRequest {
			subject: "hello".into(),
			body: "<p>hi</p>".into(),
			recipients: vec!["a@x.com".into(), "b@x.com".into()],
			start_time: "2025-01-01T10:00:00Z".into(),
			delay_between_emails: Some(30),
			hourly_limit: 100,
			sender_id: None,
		}
	}

	#[test]
	fn test_valid_request_parses_start_time() {
		let (start, delay) = validate_schedule(&request(), 5).unwrap();
		assert_eq!(start.to_iso(), "2025-01-01T10:00:00Z");
		assert_eq!(delay, 30);
	}

	#[test]
	fn test_default_delay_applies_when_omitted() {
		let mut req = request();
		req.delay_between_emails = None;
		let (_, delay) = validate_schedule(&req, 5).unwrap();
		assert_eq!(delay, 5);
	}

	#[test]
	fn test_rejects_bad_inputs() {
		let mut req = request();
		req.recipients = vec![];
		assert!(validate_schedule(&req, 5).is_err());

		let mut req = request();
		req.recipients = vec!["not-an-address".into()];
		assert!(validate_schedule(&req, 5).is_err());

		let mut req = request();
		req.hourly_limit = 0;
		assert!(validate_schedule(&req, 5).is_err());

		let mut req = request();
		req.hourly_limit = 1001;
		assert!(validate_schedule(&req, 5).is_err());

		let mut req = request();
		req.delay_between_emails = Some(3601);
		assert!(validate_schedule(&req, 5).is_err());

		let mut req = request();
		req.start_time = "yesterday".into();
		assert!(validate_schedule(&req, 5).is_err());
	}

	#[test]
	fn test_list_options_defaults_and_filter() {
		let opts = list_options(
			&ListQuery::default(),
			&[MessageStatus::Scheduled, MessageStatus::Processing],
		)
		.unwrap();
		assert_eq!(opts.page, 1);
		assert_eq!(opts.limit, 20);
		assert_eq!(opts.statuses.as_deref().map(<[_]>::len), Some(2));

		let query = ListQuery { status: Some("SENT".into()), ..ListQuery::default() };
		let opts = list_options(&query, &[MessageStatus::Scheduled]).unwrap();
		assert_eq!(opts.statuses, Some(vec![MessageStatus::Sent]));

		let query = ListQuery { status: Some("BOGUS".into()), ..ListQuery::default() };
		assert!(list_options(&query, &[]).is_err());
	}
}

// vim: ts=4

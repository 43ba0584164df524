//! API routes

use axum::{
	Json, Router,
	http::{HeaderValue, Method, header},
	middleware,
	routing::{get, post},
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth;
use crate::core::middleware::require_auth;
use crate::email;
use crate::prelude::*;
use crate::sender;

/// GET /health - liveness
async fn get_health() -> Json<serde_json::Value> {
	Json(json!({ "success": true, "timestamp": Timestamp::now().to_iso() }))
}

fn init_public_routes() -> Router<App> {
	Router::new()
		.route("/health", get(get_health))
		.route("/auth/google", get(auth::handler::get_google))
		.route("/auth/google/callback", get(auth::handler::get_google_callback))
}

fn init_protected_routes(app: App) -> Router<App> {
	Router::new()
		// --- Session ---
		.route("/auth/me", get(auth::handler::get_me))
		.route("/auth/logout", post(auth::handler::post_logout))
		// --- Senders ---
		.route(
			"/senders",
			get(sender::handler::list_senders).post(sender::handler::post_sender),
		)
		.route(
			"/senders/{sender_id}",
			get(sender::handler::get_sender)
				.put(sender::handler::put_sender)
				.delete(sender::handler::delete_sender),
		)
		// --- Emails ---
		.route("/emails/schedule", post(email::handler::post_schedule))
		.route("/emails/scheduled", get(email::handler::get_scheduled))
		.route("/emails/sent", get(email::handler::get_sent))
		.route("/emails/stats", get(email::handler::get_stats))
		.route(
			"/emails/{message_id}",
			get(email::handler::get_message).delete(email::handler::delete_message),
		)
		.layer(middleware::from_fn_with_state(app, require_auth))
}

pub fn init(app: App) -> Router {
	let mut cors = CorsLayer::new()
		.allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
		.allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
		.allow_credentials(true);
	match HeaderValue::from_str(&app.config.frontend_origin) {
		Ok(origin) => cors = cors.allow_origin(origin),
		Err(_) => warn!("invalid FRONTEND_ORIGIN, CORS origin not set"),
	}

	Router::new()
		.merge(init_public_routes())
		.merge(init_protected_routes(app.clone()))
		.layer(cors)
		.layer(TraceLayer::new_for_http())
		.with_state(app)
}

// vim: ts=4

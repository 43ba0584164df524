//! Error handling subsystem. Implements a custom Error type.

use axum::{Json, http::StatusCode, response::IntoResponse};

use crate::types::ErrorResponse;
use tracing::warn;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Core errors
	NotFound,
	Unauthorized,     // 401 - missing/invalid auth token
	PermissionDenied, // 403 - ownership mismatch
	Parse,

	// Input validation and constraints
	Validation(String), // 400 - invalid input data
	Conflict(String),   // 409 - constraint violation (unique, last sender, etc)

	// Subsystem availability
	QueueUnavailable(String),     // 503 - persistent queue unreachable
	StoreUnavailable(String),     // 503 - durable store unreachable
	TransportFailure(String),     // mail transport failed; workers retry these
	Timeout,

	// System
	Internal(String), // Internal invariant violations, for debugging

	// externals
	Io(std::io::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::Unauthorized => write!(f, "authentication required"),
			Error::PermissionDenied => write!(f, "permission denied"),
			Error::Parse => write!(f, "parse error"),
			Error::Validation(msg) => write!(f, "validation failed: {}", msg),
			Error::Conflict(msg) => write!(f, "conflict: {}", msg),
			Error::QueueUnavailable(msg) => write!(f, "queue unavailable: {}", msg),
			Error::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
			Error::TransportFailure(msg) => write!(f, "transport failure: {}", msg),
			Error::Timeout => write!(f, "operation timed out"),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl Error {
	/// Stable wire code for this kind, carried alongside the human message
	pub fn code(&self) -> &'static str {
		match self {
			Error::NotFound => "E-CORE-NOTFOUND",
			Error::Unauthorized => "E-AUTH-UNAUTH",
			Error::PermissionDenied => "E-AUTH-NOPERM",
			Error::Parse => "E-CORE-PARSE",
			Error::Validation(_) => "E-VAL-INVALID",
			Error::Conflict(_) => "E-CORE-CONFLICT",
			Error::QueueUnavailable(_) => "E-QUEUE-UNAVAIL",
			Error::StoreUnavailable(_) => "E-STORE-UNAVAIL",
			Error::TransportFailure(_) => "E-MAIL-SENDFAIL",
			Error::Timeout => "E-NET-TIMEOUT",
			Error::Internal(_) => "E-CORE-INTERNAL",
			Error::Io(_) => "E-SYS-IO",
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let code = self.code();
		let (status, message) = match self {
			Error::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
			Error::Unauthorized => {
				(StatusCode::UNAUTHORIZED, "Authentication required or invalid token".to_string())
			}
			Error::PermissionDenied => (
				StatusCode::FORBIDDEN,
				"You do not have permission to access this resource".to_string(),
			),
			Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
			Error::Conflict(msg) => (StatusCode::CONFLICT, msg),
			Error::QueueUnavailable(msg) => {
				warn!("queue unavailable: {}", msg);
				(StatusCode::SERVICE_UNAVAILABLE, "Scheduling queue unavailable".to_string())
			}
			Error::StoreUnavailable(msg) => {
				warn!("store unavailable: {}", msg);
				(StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable".to_string())
			}
			Error::TransportFailure(msg) => {
				warn!("transport failure: {}", msg);
				(StatusCode::SERVICE_UNAVAILABLE, "Mail transport unavailable".to_string())
			}
			Error::Timeout => (StatusCode::REQUEST_TIMEOUT, "Request timeout".to_string()),
			// Server errors (5xx) - no message exposure for security
			Error::Internal(msg) => {
				warn!("internal error: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
			}
			Error::Parse => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
			Error::Io(_) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
			}
		};

		(status, Json(ErrorResponse::new(code, message))).into_response()
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<std::num::ParseIntError> for Error {
	fn from(err: std::num::ParseIntError) -> Self {
		warn!("parse int error: {}", err);
		Error::Parse
	}
}

impl From<std::time::SystemTimeError> for Error {
	fn from(err: std::time::SystemTimeError) -> Self {
		warn!("system time error: {}", err);
		Error::Internal("system time error".into())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Error::Parse
	}
}

impl From<axum::Error> for Error {
	fn from(err: axum::Error) -> Self {
		warn!("axum error: {}", err);
		Error::Internal("http error".into())
	}
}

impl From<axum::http::Error> for Error {
	fn from(err: axum::http::Error) -> Self {
		warn!("http error: {}", err);
		Error::Internal("http error".into())
	}
}

impl From<axum::http::header::ToStrError> for Error {
	fn from(err: axum::http::header::ToStrError) -> Self {
		warn!("header to str error: {}", err);
		Error::Parse
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		warn!("tokio join error: {}", err);
		Error::Internal("task execution failed".into())
	}
}

// vim: ts=4

//! Common types used throughout the dripmail platform.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;

// Entity ids //
//************//

macro_rules! id_type {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub i64);

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", self.0)
			}
		}
	};
}

id_type!(
	/// Opaque id of a user (tenant)
	UserId
);
id_type!(
	/// Opaque id of an outbound sender identity
	SenderId
);
id_type!(
	/// Opaque id of a scheduled message
	MessageId
);
id_type!(
	/// Opaque id of a schedule batch
	BatchId
);

// Timestamp //
//***********//

/// Wall-clock instant in unix seconds.
///
/// Second precision is deliberate; the service makes no sub-second
/// scheduling promises.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64)
	}

	pub fn from_now(delta: i64) -> Timestamp {
		Timestamp(Self::now().0 + delta)
	}

	pub fn add_seconds(&self, seconds: i64) -> Timestamp {
		Timestamp(self.0 + seconds)
	}

	/// Start of the UTC calendar hour containing this instant
	pub fn hour_start(&self) -> Timestamp {
		Timestamp(self.0 - self.0.rem_euclid(3600))
	}

	/// Start of the next UTC calendar hour after this instant
	pub fn next_hour_start(&self) -> Timestamp {
		Timestamp(self.hour_start().0 + 3600)
	}

	pub fn to_datetime(&self) -> DateTime<Utc> {
		Utc.timestamp_opt(self.0, 0).single().unwrap_or_default()
	}

	pub fn from_datetime(dt: &DateTime<Utc>) -> Timestamp {
		Timestamp(dt.timestamp())
	}

	/// RFC 3339 rendering, used in durable rate-counter keys
	pub fn to_iso(&self) -> String {
		self.to_datetime().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

// MessageStatus //
//***************//

/// Lifecycle state of a message; see the state machine in the worker module.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
	Scheduled,
	Processing,
	Sent,
	Failed,
	RateLimited,
}

impl MessageStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			MessageStatus::Scheduled => "SCHEDULED",
			MessageStatus::Processing => "PROCESSING",
			MessageStatus::Sent => "SENT",
			MessageStatus::Failed => "FAILED",
			MessageStatus::RateLimited => "RATE_LIMITED",
		}
	}

	/// SENT and FAILED are terminal; nothing transitions out of them.
	pub fn is_terminal(&self) -> bool {
		matches!(self, MessageStatus::Sent | MessageStatus::Failed)
	}
}

impl std::fmt::Display for MessageStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for MessageStatus {
	type Err = crate::error::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"SCHEDULED" => Ok(MessageStatus::Scheduled),
			"PROCESSING" => Ok(MessageStatus::Processing),
			"SENT" => Ok(MessageStatus::Sent),
			"FAILED" => Ok(MessageStatus::Failed),
			"RATE_LIMITED" => Ok(MessageStatus::RateLimited),
			_ => Err(crate::error::Error::Validation(format!("invalid message status: {}", s))),
		}
	}
}

// Patch<T> - For PATCH semantics //
//********************************//

/// Represents a field in a PATCH request with three states:
/// - `Undefined`: Field not present in JSON - don't change existing value
/// - `Null`: Field present with null value - set to NULL in database
/// - `Value(T)`: Field present with value - update to this value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Patch<T> {
	/// Field not present in request - no change
	#[default]
	Undefined,
	/// Field present with null value - delete/set to NULL
	Null,
	/// Field present with value - update to this value
	Value(T),
}

impl<T> Patch<T> {
	pub fn is_undefined(&self) -> bool {
		matches!(self, Patch::Undefined)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Patch::Null)
	}

	pub fn is_value(&self) -> bool {
		matches!(self, Patch::Value(_))
	}

	pub fn value(&self) -> Option<&T> {
		match self {
			Patch::Value(v) => Some(v),
			_ => None,
		}
	}

	pub fn map<U, F>(self, f: F) -> Patch<U>
	where
		F: FnOnce(T) -> U,
	{
		match self {
			Patch::Undefined => Patch::Undefined,
			Patch::Null => Patch::Null,
			Patch::Value(v) => Patch::Value(f(v)),
		}
	}
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
	T: Deserialize<'de>,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<T>::deserialize(deserializer).map(|opt| match opt {
			None => Patch::Null,
			Some(v) => Patch::Value(v),
		})
	}
}

// API envelope //
//**************//

/// Pagination block of the response envelope
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
	pub page: u32,
	pub limit: u32,
	pub total: u64,
	pub total_pages: u32,
	pub has_more: bool,
}

impl Pagination {
	pub fn new(page: u32, limit: u32, total: u64) -> Self {
		let limit = limit.max(1);
		let total_pages = (total as u32).div_ceil(limit);
		Self { page, limit, total, total_pages, has_more: page < total_pages }
	}
}

/// Success envelope: `{success, data?, message?, pagination?}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pagination: Option<Pagination>,
}

impl<T> ApiResponse<T> {
	pub fn new(data: T) -> Self {
		Self { success: true, data: Some(data), message: None, pagination: None }
	}

	pub fn with_pagination(data: T, page: u32, limit: u32, total: u64) -> Self {
		Self {
			success: true,
			data: Some(data),
			message: None,
			pagination: Some(Pagination::new(page, limit, total)),
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}
}

impl ApiResponse<()> {
	/// Data-less acknowledgement (logout, cancel, ...)
	pub fn message_only(message: impl Into<String>) -> Self {
		Self { success: true, data: None, message: Some(message.into()), pagination: None }
	}
}

/// Error envelope: `{success: false, error, code}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub success: bool,
	pub error: String,
	/// Stable machine-readable code (`E-...`); clients branch on this, not
	/// on the message text
	pub code: &'static str,
}

impl ErrorResponse {
	pub fn new(code: &'static str, error: impl Into<String>) -> Self {
		Self { success: false, error: error.into(), code }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hour_start_alignment() {
		// 2025-01-01T10:59:30Z
		let ts = Timestamp(1735729170);
		assert_eq!(ts.hour_start().0 % 3600, 0);
		assert!(ts.hour_start() <= ts);
		assert_eq!(ts.next_hour_start().0, ts.hour_start().0 + 3600);
	}

	#[test]
	fn test_status_round_trip() {
		for s in ["SCHEDULED", "PROCESSING", "SENT", "FAILED", "RATE_LIMITED"] {
			let parsed: MessageStatus = s.parse().unwrap();
			assert_eq!(parsed.as_str(), s);
		}
		assert!("BOGUS".parse::<MessageStatus>().is_err());
	}

	#[test]
	fn test_pagination_math() {
		let p = Pagination::new(1, 10, 25);
		assert_eq!(p.total_pages, 3);
		assert!(p.has_more);
		let p = Pagination::new(3, 10, 25);
		assert!(!p.has_more);
		let p = Pagination::new(1, 10, 0);
		assert_eq!(p.total_pages, 0);
		assert!(!p.has_more);
	}

	#[test]
	fn test_patch_deserialize() {
		#[derive(serde::Deserialize, Default)]
		struct Req {
			#[serde(default)]
			name: Patch<String>,
		}

		let req: Req = serde_json::from_str("{}").unwrap();
		assert!(req.name.is_undefined());
		let req: Req = serde_json::from_str(r#"{"name":null}"#).unwrap();
		assert!(req.name.is_null());
		let req: Req = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
		assert_eq!(req.name.value().map(String::as_str), Some("x"));
	}
}

// vim: ts=4

pub use crate::core::app::App;
pub use dripmail_types::error::{ClResult, Error};
pub use dripmail_types::types::{
	BatchId, MessageId, MessageStatus, Patch, SenderId, Timestamp, UserId,
};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4

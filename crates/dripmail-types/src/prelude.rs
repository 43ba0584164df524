pub use crate::error::{ClResult, Error};
pub use crate::types::{BatchId, MessageId, MessageStatus, Patch, SenderId, Timestamp, UserId};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4

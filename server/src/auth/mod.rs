//! Authentication: OAuth login flow, session tokens, current-user routes

pub mod google;
pub mod handler;
pub mod token;

use crate::prelude::*;

/// The authenticated principal attached to every protected request
#[derive(Debug, Clone)]
pub struct AuthCtx {
	pub user_id: UserId,
	pub email: Box<str>,
}

// vim: ts=4

//! Session token issuance and validation (HS256 JWTs)

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
	/// User id
	pub sub: i64,
	pub email: String,
	pub iat: i64,
	pub exp: i64,
}

pub fn issue(secret: &str, user_id: UserId, email: &str, expiry_secs: i64) -> ClResult<String> {
	let now = Timestamp::now().0;
	let claims = Claims { sub: user_id.0, email: email.into(), iat: now, exp: now + expiry_secs };

	encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(
		|err| {
			warn!("jwt encode failed: {}", err);
			Error::Internal("token issuance failed".into())
		},
	)
}

pub fn validate(secret: &str, token: &str) -> ClResult<Claims> {
	decode::<Claims>(
		token,
		&DecodingKey::from_secret(secret.as_bytes()),
		&Validation::new(Algorithm::HS256),
	)
	.map(|data| data.claims)
	.map_err(|_| Error::Unauthorized)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_round_trip() {
		let token = issue("secret", UserId(7), "a@example.com", 3600).unwrap();
		let claims = validate("secret", &token).unwrap();
		assert_eq!(claims.sub, 7);
		assert_eq!(claims.email, "a@example.com");
	}

	#[test]
	fn test_wrong_secret_rejected() {
		let token = issue("secret", UserId(7), "a@example.com", 3600).unwrap();
		assert!(matches!(validate("other", &token), Err(Error::Unauthorized)));
	}

	#[test]
	fn test_expired_rejected() {
		// Past the validator's default leeway
		let token = issue("secret", UserId(7), "a@example.com", -120).unwrap();
		assert!(matches!(validate("secret", &token), Err(Error::Unauthorized)));
	}

	#[test]
	fn test_garbage_rejected() {
		assert!(matches!(validate("secret", "not-a-token"), Err(Error::Unauthorized)));
	}
}

// vim: ts=4

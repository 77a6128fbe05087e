//! Bearer-token identity extraction.
//!
//! Token issuance (login, registration, password verification) is out of
//! scope for this service (spec.md §1); this module only decodes the
//! opaque credential to recover a `user_id` for already-authenticated
//! requests.

use crate::error::ServiceError;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

pub fn decode_bearer(header_value: &str, secret: &str) -> Result<AuthenticatedUser, ServiceError> {
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer credential".to_string()))?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("invalid credential: {e}")))?;

    Ok(AuthenticatedUser(data.claims.sub))
}

//! Bearer token verification.
//!
//! The trait keeps the transport layer testable; the HS256 implementation is
//! what production wiring uses. Token issuance stays with the identity
//! provider and is not modeled here.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::claims::{JwtClaims, validate_claims};
use crate::{PrincipalId, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("malformed or badly signed token")]
    Invalid,

    #[error("token claims rejected: {0}")]
    Claims(#[from] crate::claims::TokenValidationError),
}

/// Verifier of presented bearer tokens.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError>;
}

/// Wire-level claims as they appear inside the token payload.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: Uuid,
    roles: Vec<String>,
    iat: i64,
    exp: i64,
}

/// HS256 validator over a shared secret.
pub struct Hs256JwtValidator {
    key: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            key: DecodingKey::from_secret(&secret),
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is re-checked below against the caller-supplied clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<WireClaims>(token, &self.key, &validation)
            .map_err(|_| JwtError::Invalid)?;

        let issued_at = Utc
            .timestamp_opt(data.claims.iat, 0)
            .single()
            .ok_or(JwtError::Invalid)?;
        let expires_at = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or(JwtError::Invalid)?;

        let claims = JwtClaims {
            sub: PrincipalId::from_uuid(data.claims.sub),
            roles: data.claims.roles.into_iter().map(Role::new).collect(),
            issued_at,
            expires_at,
        };

        validate_claims(&claims, now)?;
        Ok(claims)
    }
}

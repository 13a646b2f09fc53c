//! Access tokens signed with the per-account secret held by the gateway.
//!
//! The gateway `jwt-auth` plugin finds the consumer through the `key` claim and
//! checks the signature with the same secret, so rotating the secret (a
//! password change) invalidates every token issued before it.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TTL_HOURS: u32 = 24;
/// One year.
pub const MAX_TTL_HOURS: u32 = 8760;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub key: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer {
    ttl: Duration,
}

impl TokenIssuer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: Duration::hours(i64::from(DEFAULT_TTL_HOURS)),
        }
    }

    #[must_use]
    pub fn with_ttl_hours(mut self, hours: u32) -> Self {
        self.ttl = Duration::hours(i64::from(hours));
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// # Errors
    /// Returns an error if the expiry is out of range or the claims cannot be signed.
    pub fn issue(&self, username: &str, key: &str, secret: &str) -> Result<String> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(self.ttl)
            .context("access token expiry out of range")?;
        let claims = Claims {
            sub: username.to_string(),
            key: key.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .context("failed to sign access token")
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate signature and expiry with the account secret.
#[cfg(test)]
pub(crate) fn verify(token: &str, secret: &str) -> Result<Claims> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
        &jsonwebtoken::Validation::new(Algorithm::HS256),
    )
    .context("invalid access token")?;

    Ok(data.claims)
}

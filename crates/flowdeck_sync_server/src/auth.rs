//! Authentication support for the sync server.
//!
//! This module provides bearer-token authentication using HMAC-SHA256.
//! Tokens include an issue timestamp for expiration checking.
//!
//! ## Token Format
//!
//! `userId:sessionId:issuedAtMillis:signature`, where `signature` is the
//! hex-encoded HMAC-SHA256 of the first three fields joined by `:`.
//! Neither id may contain `:`.

use crate::error::{ServerError, ServerResult};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// User id assumed when authentication is disabled and no header names one.
pub const DEV_USER_ID: &str = "local";

/// Session id assumed when authentication is disabled and no header names one.
pub const DEV_SESSION_ID: &str = "default";

/// Identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Owner of every entity the caller touches.
    pub user_id: String,
    /// Client session (device) of the caller.
    pub session_id: String,
}

impl Principal {
    /// Creates a principal.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Principal used in development mode.
    pub fn development() -> Self {
        Self::new(DEV_USER_ID, DEV_SESSION_ID)
    }
}

/// Credentials presented with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token from the `Authorization` header.
    pub bearer: Option<String>,
    /// User id header, honored only when authentication is disabled.
    pub user_id: Option<String>,
    /// Session id header, honored only when authentication is disabled.
    pub session_id: Option<String>,
}

impl Credentials {
    /// Credentials carrying a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            ..Self::default()
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Token issuer and validator.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for a user session, issued now.
    pub fn create_token(&self, principal: &Principal) -> ServerResult<String> {
        self.create_token_at(principal, Utc::now().timestamp_millis())
    }

    /// Creates a token with an explicit issue time (Unix millis).
    pub fn create_token_at(&self, principal: &Principal, issued_at: i64) -> ServerResult<String> {
        for (field, value) in [
            ("userId", &principal.user_id),
            ("sessionId", &principal.session_id),
        ] {
            if value.is_empty() || value.contains(':') {
                return Err(ServerError::InvalidRequest(format!(
                    "{} must be non-empty and must not contain ':'",
                    field
                )));
            }
        }

        let claims = format!("{}:{}:{}", principal.user_id, principal.session_id, issued_at);
        let mac = self.mac(&claims)?;
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}:{}", claims, signature))
    }

    /// Validates a token and returns the principal it was issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<Principal> {
        let (claims, signature) = token
            .rsplit_once(':')
            .ok_or_else(|| unauthorized("malformed token"))?;

        let mut parts = claims.split(':');
        let (user_id, session_id, issued_at) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(u), Some(s), Some(t), None) if !u.is_empty() && !s.is_empty() => (u, s, t),
                _ => return Err(unauthorized("malformed token")),
            };

        let signature = hex::decode(signature).map_err(|_| unauthorized("malformed signature"))?;
        self.mac(claims)?
            .verify_slice(&signature)
            .map_err(|_| unauthorized("invalid signature"))?;

        let issued_at: i64 = issued_at
            .parse()
            .map_err(|_| unauthorized("malformed token"))?;
        let expiry_millis = i64::try_from(self.config.token_expiry.as_millis()).unwrap_or(i64::MAX);
        if Utc::now().timestamp_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(unauthorized("token expired"));
        }

        Ok(Principal::new(user_id, session_id))
    }

    fn mac(&self, claims: &str) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {}", e)))?;
        mac.update(claims.as_bytes());
        Ok(mac)
    }
}

fn unauthorized(reason: &str) -> ServerError {
    ServerError::AuthenticationFailed(reason.to_string())
}

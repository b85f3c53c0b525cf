use axum::http::{header, HeaderMap};
use chrono::{TimeDelta, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SecurityConfig;

/// Cookie consulted when the request carries no `Authorization` header
pub const TOKEN_COOKIE: &str = "jwt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(account_id: Uuid, ttl: TimeDelta) -> Result<Self, TokenError> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Generation(format!("token lifetime {} is out of range", ttl)))?;
        Ok(Self {
            sub: account_id,
            iat: now.timestamp(),
            exp: expires.timestamp(),
        })
    }

    pub fn with_expiry_hours(account_id: Uuid, hours: u64) -> Result<Self, TokenError> {
        let ttl = i64::try_from(hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .ok_or_else(|| TokenError::Generation(format!("token lifetime of {} hours is out of range", hours)))?;
        Self::new(account_id, ttl)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Authorization header must use Bearer token format")]
    NotBearer,

    #[error("Empty JWT token")]
    Empty,

    #[error("Malformed JWT token: {0}")]
    Malformed(String),

    #[error("JWT signature is invalid")]
    InvalidSignature,

    #[error("JWT token has expired")]
    Expired,

    #[error("JWT token is not yet valid")]
    NotYetValid,

    #[error("JWT secret not configured")]
    SecretNotConfigured,

    #[error("JWT generation error: {0}")]
    Generation(String),
}

pub fn issue_token(secret: &str, claims: &Claims) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::SecretNotConfigured);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| TokenError::Generation(e.to_string()))
}

/// Sign a session token for `account_id` with the configured secret and lifetime
pub fn issue_session_token(security: &SecurityConfig, account_id: Uuid) -> Result<String, TokenError> {
    let claims = Claims::with_expiry_hours(account_id, security.jwt_expiry_hours)?;
    issue_token(&security.jwt_secret, &claims)
}

/// HS256 verifier bound to the configured secret
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::SecretNotConfigured);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Check signature and that now falls within [iat, exp]
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            _ => TokenError::Malformed(e.to_string()),
        })?;

        if data.claims.iat > Utc::now().timestamp() {
            return Err(TokenError::NotYetValid);
        }

        Ok(data.claims)
    }
}

/// Pull a bearer token out of the request headers.
///
/// `Ok(None)` means no credentials were presented at all. An `Authorization`
/// header that is present but not a usable bearer token is an error; the
/// `jwt` cookie is only consulted when the header is absent.
pub fn extract_token(headers: &HeaderMap) -> Result<Option<String>, TokenError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| TokenError::NotBearer)?;
        let (scheme, token) = value.split_once(' ').ok_or(TokenError::NotBearer)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(TokenError::NotBearer);
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        return Ok(Some(token.to_string()));
    }

    Ok(token_from_cookie(headers))
}

fn token_from_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Short, non-reversible token identifier safe to put in logs
pub fn token_fingerprint(token: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(token.as_bytes()));
    digest[..12].to_string()
}

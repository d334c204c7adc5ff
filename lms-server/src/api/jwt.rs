//! JWT authentication service.
//!
//! Token validation for the REST and WebSocket surfaces. User management
//! and credential issuance live in a separate identity service; this crate
//! only verifies claims (and mints tokens in tests).

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User ID (subject)
    pub sub: String,
    /// User roles for authorization
    pub roles: Vec<String>,
    /// Token issuer
    pub iss: String,
    /// Token audience
    pub aud: String,
    /// Expiration timestamp (Unix)
    pub exp: u64,
    /// Issued at timestamp (Unix)
    pub iat: u64,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

/// JWT service error types.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
    #[error("Token validation failed: {0}")]
    TokenValidation(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
}

/// JWT service for token generation and validation.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiration_secs: u64,
}

impl JwtService {
    /// Create a new JWT service.
    pub fn new(secret: &str, issuer: &str, audience: &str, expiration_secs: Option<u64>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            expiration_secs: expiration_secs.unwrap_or(3600),
        }
    }

    /// Create a new JWT service from environment variables.
    ///
    /// Returns None when `JWT_SECRET` is unset, which disables every
    /// authenticated route.
    pub fn from_env() -> Option<Self> {
        let secret = std::env::var("JWT_SECRET").ok()?;
        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "lms-server".to_string());
        let audience = std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "lms-api".to_string());
        let expiration_secs = std::env::var("JWT_EXPIRATION_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok());

        info!(
            "JWT service initialized (issuer: {}, audience: {})",
            issuer, audience
        );

        Some(Self::new(&secret, &issuer, &audience, expiration_secs))
    }

    /// Generate a JWT token for a user.
    pub fn generate_token(&self, user_id: &str, roles: Vec<String>) -> Result<String, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))?
            .as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            roles,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: now + self.expiration_secs,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))
    }

    /// Validate a JWT token and extract claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidToken,
                _ => JwtError::TokenValidation(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test-secret-key-32-chars-long!!", "lms-server", "lms-api", Some(3600))
    }

    #[test]
    fn test_generate_and_validate_round_trip() {
        let jwt = service();
        let token = jwt
            .generate_token("user-1", vec!["admin".to_string()])
            .unwrap();
        let claims = jwt.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.is_admin());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let jwt = service();
        let other = JwtService::new("another-secret-entirely-here!!!!", "lms-server", "lms-api", None);
        let token = jwt.generate_token("user-1", vec![]).unwrap();
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn test_wrong_audience_is_rejected() {
        let jwt = service();
        let other = JwtService::new(
            "test-secret-key-32-chars-long!!",
            "lms-server",
            "other-api",
            None,
        );
        let token = jwt.generate_token("user-1", vec![]).unwrap();
        assert!(other.validate_token(&token).is_err());
    }
}

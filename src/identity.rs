//! Caller identity.

use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Bearer token presented by an authenticated caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Guest,
    Authenticated(Credentials),
}

#[async_trait]
pub trait IdentityValidator: Send + Sync {
    /// Returns the customer key the credentials belong to.
    async fn validate(&self, credentials: &Credentials) -> Result<Uuid, ServiceError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Customer key
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT validation with the shared secret.
#[derive(Clone)]
pub struct JwtIdentityValidator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl JwtIdentityValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issues a token for `customer_key`; used by operators and tests.
    pub fn issue(&self, customer_key: Uuid, ttl: Duration) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: customer_key.to_string(),
            email: None,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))
    }
}

#[async_trait]
impl IdentityValidator for JwtIdentityValidator {
    async fn validate(&self, credentials: &Credentials) -> Result<Uuid, ServiceError> {
        let claims = decode::<Claims>(
            &credentials.token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServiceError::Unauthorized("token expired".to_string())
            }
            _ => ServiceError::Unauthorized("invalid token".to_string()),
        })?
        .claims;

        Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("invalid token subject".to_string()))
    }
}

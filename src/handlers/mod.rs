use crate::{
    errors::ServiceError,
    identity::{Caller, Credentials},
    AppState,
};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use uuid::Uuid;
use validator::Validate;

pub mod cart;
pub mod checkout;
pub mod fulfillment;
pub mod purchases;

/// Bearer token from `Authorization`, if one was sent.
pub fn bearer_credentials(headers: &HeaderMap) -> Option<Credentials> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Credentials::bearer)
}

pub fn caller(headers: &HeaderMap) -> Caller {
    match bearer_credentials(headers) {
        Some(credentials) => Caller::Authenticated(credentials),
        None => Caller::Guest,
    }
}

/// Customer key for requests that must be authenticated.
pub async fn require_customer(state: &AppState, headers: &HeaderMap) -> Result<Uuid, ServiceError> {
    let credentials = bearer_credentials(headers)
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;
    state.env.identity.validate(&credentials).await
}

/// Customer key when credentials were sent, `None` for guests.
pub async fn optional_customer(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Uuid>, ServiceError> {
    match bearer_credentials(headers) {
        Some(credentials) => Ok(Some(state.env.identity.validate(&credentials).await?)),
        None => Ok(None),
    }
}

pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_bearer_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller(&headers), Caller::Guest);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(
            caller(&headers),
            Caller::Authenticated(Credentials::bearer("abc.def"))
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(caller(&headers), Caller::Guest);
    }
}

//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation id
//! - [`BearerToken`]: the token from an `Authorization: Bearer ...` header
//!
//! # Example
//!
//! ```ignore
//! use slotledger_web::extractors::CorrelationId;
//!
//! async fn handler(correlation_id: CorrelationId) -> Result<Json<Receipt>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, "Recording manual entry");
//!     Ok(Json(receipt))
//! }
//! ```

use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Correlation ID for request tracing.
///
/// Uses the id stored by the correlation middleware when it is installed,
/// then the `X-Correlation-ID` header, and finally a fresh UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Bearer token presented by the caller, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub Option<String>);

impl BearerToken {
    /// Token from an `Authorization: Bearer <token>` header.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self(bearer_token(headers).map(str::to_string))
    }

    /// Whether the presented token equals `expected`, compared in constant time.
    #[must_use]
    pub fn matches(&self, expected: &str) -> bool {
        let Some(presented) = self.0.as_deref() else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
            return false;
        };
        mac.update(expected.as_bytes());
        let tag = mac.finalize().into_bytes();

        let Ok(mut mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
            return false;
        };
        mac.update(presented.as_bytes());
        mac.verify_slice(&tag).is_ok()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, uuid.to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let Ok(correlation_id) = CorrelationId::from_request_parts(&mut parts, &()).await;

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_prefers_extension() {
        let stored = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        parts.extensions.insert(stored);
        let Ok(correlation_id) = CorrelationId::from_request_parts(&mut parts, &()).await;

        assert_eq!(correlation_id.0, stored);
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let Ok(token) = BearerToken::from_request_parts(&mut parts, &()).await;

        assert_eq!(token.0.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_bearer_token_matches() {
        let token = BearerToken(Some("s3cret".to_string()));
        assert!(token.matches("s3cret"));
        assert!(!token.matches("s3cre"));
        assert!(!token.matches("s3cret!"));
        assert!(!token.matches("S3CRET"));
        assert!(!BearerToken(None).matches("s3cret"));
    }
}

//! Axum middleware for request tracking and operator authentication.
//!
//! - **Correlation ID tracking**: read `X-Correlation-ID` (or generate one),
//!   store it in request extensions, open an `http_request` span carrying it,
//!   and echo it on the response
//! - **Bearer authentication**: guard operator routes with a static token
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use slotledger_web::middleware::{bearer_auth_layer, correlation_id_layer};
//!
//! let app = Router::new()
//!     .route("/api/capacity", get(list_capacity))
//!     .layer(bearer_auth_layer(config.server.admin_token.clone()))
//!     .layer(correlation_id_layer());
//! ```

use crate::error::AppError;
use crate::extractors::BearerToken;
use axum::{
    extract::Request,
    http::HeaderValue,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// Create a layer that adds correlation ID tracking to all requests.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(correlation_id);

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

/// Correlation id stored by [`correlation_id_layer`].
pub trait CorrelationIdExt {
    /// The correlation id, or `None` if the middleware is not installed.
    fn correlation_id(&self) -> Option<Uuid>;
}

impl CorrelationIdExt for Request {
    fn correlation_id(&self) -> Option<Uuid> {
        self.extensions().get::<Uuid>().copied()
    }
}

/// Create a layer that requires `Authorization: Bearer <token>`.
///
/// With `None` every request passes; deployments without an operator token
/// are expected to keep the admin routes off the public network.
#[must_use]
pub fn bearer_auth_layer(token: Option<String>) -> BearerAuthLayer {
    BearerAuthLayer {
        token: token.map(Arc::from),
    }
}

/// Layer for static bearer token authentication.
#[derive(Clone)]
pub struct BearerAuthLayer {
    token: Option<Arc<str>>,
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthMiddleware {
            inner,
            token: self.token.clone(),
        }
    }
}

/// Middleware service for bearer token authentication.
#[derive(Clone)]
pub struct BearerAuthMiddleware<S> {
    inner: S,
    token: Option<Arc<str>>,
}

impl<S> Service<Request> for BearerAuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        if let Some(expected) = &self.token {
            if !BearerToken::from_headers(req.headers()).matches(expected) {
                tracing::warn!(uri = %req.uri(), "Rejected request without valid bearer token");
                return Box::pin(async {
                    Ok(AppError::unauthorized("Missing or invalid bearer token").into_response())
                });
            }
        }

        Box::pin(self.inner.call(req))
    }
}

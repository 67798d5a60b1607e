//! Axum building blocks for the Slotledger HTTP surface.
//!
//! Routes live in `slotledger-engine`; this crate holds the pieces every
//! route shares:
//!
//! - [`AppError`]: uniform JSON error bodies with status mapping
//! - [`correlation_id_layer`]: `X-Correlation-ID` propagation and the
//!   per-request tracing span
//! - [`bearer_auth_layer`]: static bearer token guard for operator routes
//! - [`handlers::health`]: liveness and readiness bodies
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use slotledger_web::{bearer_auth_layer, correlation_id_layer, handlers::health_check};
//!
//! let admin = Router::new()
//!     .route("/orders", get(list_orders))
//!     .layer(bearer_auth_layer(Some("secret".to_string())));
//!
//! let app = Router::new()
//!     .route("/health", get(health_check))
//!     .nest("/api", admin)
//!     .layer(correlation_id_layer());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::{BearerToken, CorrelationId};
pub use middleware::{
    CORRELATION_ID_HEADER, CorrelationIdExt, bearer_auth_layer, correlation_id_layer,
};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

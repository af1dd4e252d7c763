//! HTTP-side helpers that feed the core middleware chain.
//!
//! The interceptors themselves live in `fluxgate_core::middleware`. This module only turns
//! HTTP requests into the caller key and correlation id a `RequestContext` needs.

pub mod client_ip;
pub mod correlation_id;

pub use client_ip::client_ip;
pub use correlation_id::{
    create_request_id_layers, CorrelationId, UuidRequestIdGenerator, X_REQUEST_ID,
};

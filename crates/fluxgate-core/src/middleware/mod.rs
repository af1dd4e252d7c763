//! Request interceptors run around every JSON-RPC call.
//!
//! HTTP concerns (client address extraction, correlation ids) live in
//! `crates/server/src/middleware`; this module holds the per-call chain the server builds
//! once at startup.
//!
//! # Architecture
//!
//! ```text
//!   JsonRpcRequest + RequestContext
//!        │
//!        ▼
//!   ┌─────────────────────────┐
//!   │  1. RATE LIMITING       │  token bucket per caller
//!   └─────────────────────────┘
//!        │ RateLimited? ─> JSON-RPC -32005
//!        ▼
//!   ┌─────────────────────────┐
//!   │  2. METRICS             │  request counters and latency (after-hook)
//!   └─────────────────────────┘
//!        ▼
//!   ┌─────────────────────────┐
//!   │  3. LOGGING             │  one line per call with caller and node
//!   └─────────────────────────┘
//!        ▼
//!   ┌─────────────────────────┐
//!   │  4. CLIENT BINDING      │  RoutableClientProvider picks the node
//!   └─────────────────────────┘
//!        │ NoHealthyClient? ─> JSON-RPC -32603
//!        ▼
//!   CallHandler (proxy engine)
//! ```
//!
//! Any `before` hook may short-circuit with an error. After-hooks then run in reverse
//! order for every interceptor whose `before` ran, including the one that failed, so
//! short-circuited calls are still measured and logged.
//!
//! Batches first pass [`MiddlewareChain::before_batch`], where each interceptor may veto
//! the whole batch; the rate limiter charges the batch once by its size there.

pub mod client_binding;
pub mod logging;
pub mod metrics;
pub mod rate_limiting;

pub use client_binding::ClientBindingInterceptor;
pub use logging::LoggingInterceptor;
pub use metrics::MetricsInterceptor;
pub use rate_limiting::{RateLimitInterceptor, RateLimiter};

use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Instant};

use crate::{
    node::Node,
    proxy::errors::ProxyError,
    pubsub::Notifier,
    types::JsonRpcRequest,
};

/// Request-scoped data shared by the interceptors and the handler.
#[derive(Clone)]
pub struct RequestContext {
    /// Stable caller key, normally the client IP.
    pub caller: Arc<str>,
    pub correlation_id: Arc<str>,
    pub started: Instant,
    /// Set by client binding.
    pub node: Option<Arc<Node>>,
    /// Present only on WebSocket connections.
    pub notifier: Option<Arc<Notifier>>,
    /// The call is part of a batch that was already charged by the rate limiter.
    pub in_batch: bool,
}

impl RequestContext {
    #[must_use]
    pub fn new(caller: impl Into<Arc<str>>, correlation_id: impl Into<Arc<str>>) -> Self {
        Self {
            caller: caller.into(),
            correlation_id: correlation_id.into(),
            started: Instant::now(),
            node: None,
            notifier: None,
            in_batch: false,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Fresh context for one call of a batch.
    #[must_use]
    pub fn for_batch_item(&self) -> Self {
        Self {
            caller: Arc::clone(&self.caller),
            correlation_id: Arc::clone(&self.correlation_id),
            started: Instant::now(),
            node: None,
            notifier: self.notifier.clone(),
            in_batch: true,
        }
    }

    /// The bound node.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] when client binding has not run.
    pub fn node(&self) -> Result<&Arc<Node>, ProxyError> {
        self.node.as_ref().ok_or_else(|| ProxyError::Internal("no node bound to request".into()))
    }

    /// Milliseconds since the call entered the chain.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
    }
}

/// One stage of the middleware chain.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before the handler. An error short-circuits the call.
    async fn before(
        &self,
        ctx: &mut RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<(), ProxyError>;

    /// Runs once per batch before any of its calls. An error rejects the whole batch.
    ///
    /// # Errors
    ///
    /// Implementations return the error every call of the batch is answered with.
    fn before_batch(
        &self,
        _ctx: &RequestContext,
        _requests: &[JsonRpcRequest],
    ) -> Result<(), ProxyError> {
        Ok(())
    }

    /// Runs after the handler (or after a short-circuit) with the outcome.
    fn after(
        &self,
        _ctx: &RequestContext,
        _request: &JsonRpcRequest,
        _outcome: &Result<Value, ProxyError>,
    ) {
    }
}

/// The innermost stage: answers a call once every interceptor let it through.
#[async_trait]
pub trait CallHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError>;
}

/// Ordered interceptors, outermost first.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// # Errors
    ///
    /// Returns the first veto.
    pub fn before_batch(
        &self,
        ctx: &RequestContext,
        requests: &[JsonRpcRequest],
    ) -> Result<(), ProxyError> {
        self.interceptors.iter().try_for_each(|i| i.before_batch(ctx, requests))
    }

    /// Runs `request` through every interceptor and then `handler`.
    ///
    /// # Errors
    ///
    /// Returns the short-circuit error or the handler's error.
    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        request: &JsonRpcRequest,
        handler: &dyn CallHandler,
    ) -> Result<Value, ProxyError> {
        let mut ran = 0;
        let mut rejected = None;

        for interceptor in &self.interceptors {
            ran += 1;
            if let Err(e) = interceptor.before(ctx, request).await {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    method = %request.method,
                    error = %e,
                    "call short-circuited"
                );
                rejected = Some(e);
                break;
            }
        }

        let outcome = match rejected {
            Some(e) => Err(e),
            None => handler.call(ctx, request).await,
        };

        for interceptor in self.interceptors[..ran].iter().rev() {
            interceptor.after(ctx, request, &outcome);
        }

        outcome
    }
}

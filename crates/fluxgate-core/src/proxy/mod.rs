//! Request processing behind the single JSON-RPC endpoint.
//!
//! # Request Processing Flow
//!
//! ```text
//! JsonRpcRequest
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ MiddlewareChain │ ─── short-circuit ──► error response
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   ProxyEngine   │ ─── invalid / unknown ──► error response
//! │ process_request │
//! └────────┬────────┘
//!          │
//!    ┌─────┼──────────┬───────────────┬─────────────┐
//!    ▼     ▼          ▼               ▼             ▼
//!  Logs  Blocks  Transactions   (un)subscribe   pass-through
//!    │     │          │               │             │
//!    └─────┴────┬─────┘               ▼             ▼
//!               ▼                 Notifier      bound node
//!       RequestDispatcher
//!       store ─► node fallback
//! ```
//!
//! # Handler Selection
//!
//! | Method | Handler | Store key |
//! |--------|---------|-----------|
//! | `cfx_getLogs`, `eth_getLogs` | `LogsHandler` | validated filter |
//! | `cfx_getBlockByHash` | `BlocksHandler` | block hash |
//! | `cfx_getBlockByEpochNumber`, `cfx_getBlocksByEpoch` | `BlocksHandler` | epoch |
//! | `cfx_getBlockByBlockNumber` | `BlocksHandler` | block number |
//! | `cfx_getTransactionByHash`, `cfx_getTransactionReceipt` | `TransactionsHandler` | tx hash |
//! | Other allowed methods | forward | none |

pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod utils;
pub mod validation;

pub use dispatcher::{Dispatched, RequestDispatcher, Source};
pub use engine::{ProxyEngine, SharedContext};
pub use errors::ProxyError;

use futures::future::join_all;
use std::{sync::Arc, time::Instant};

use crate::{
    metrics::MetricsCollector,
    middleware::{MiddlewareChain, RequestContext},
    types::{JsonRpcRequest, JsonRpcResponse},
};

/// Runs calls through the middleware chain and the engine and builds the responses.
pub struct Gateway {
    chain: MiddlewareChain,
    engine: Arc<ProxyEngine>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        chain: MiddlewareChain,
        engine: Arc<ProxyEngine>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self { chain, engine, metrics }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<ProxyEngine> {
        &self.engine
    }

    #[must_use]
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Answers one call. Never fails: errors become JSON-RPC error responses.
    pub async fn handle(
        &self,
        mut ctx: RequestContext,
        request: &JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = Arc::clone(&request.id);
        match self.chain.execute(&mut ctx, request, self.engine.as_ref()).await {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(e) => e.to_response(id),
        }
    }

    /// Answers a batch in request order. A batch veto answers every call with the same
    /// error.
    pub async fn handle_batch(
        &self,
        ctx: &RequestContext,
        requests: &[JsonRpcRequest],
    ) -> Vec<JsonRpcResponse> {
        let started = Instant::now();

        if let Err(e) = self.chain.before_batch(ctx, requests) {
            return requests.iter().map(|r| e.to_response(Arc::clone(&r.id))).collect();
        }

        let responses =
            join_all(requests.iter().map(|request| self.handle(ctx.for_batch_item(), request)))
                .await;

        if let Some(metrics) = &self.metrics {
            let elapsed = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
            metrics.record_batch_request(requests.len(), elapsed);
        }
        responses
    }
}

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::{
    config::BackendKind,
    filter::{FilterLimits, LogFilterValidator},
    metrics::MetricsCollector,
    middleware::{CallHandler, RequestContext},
    node::Node,
    pubsub::SubscriptionKind,
    relay::{RelayOutcome, RelayPool},
    types::JsonRpcRequest,
};

use super::{
    dispatcher::RequestDispatcher,
    errors::ProxyError,
    handlers::{BlocksHandler, LogsHandler, TransactionsHandler},
    utils::{epoch_label, epoch_param_index, string_param},
    validation::validate_request,
};

/// Shared context for all proxy handlers.
///
/// Handlers hold one `Arc<SharedContext>` instead of separate references to the
/// dispatcher, validator and metrics.
pub struct SharedContext {
    pub backend: BackendKind,
    pub dispatcher: RequestDispatcher,
    pub validator: LogFilterValidator,
    pub metrics: Option<Arc<MetricsCollector>>,
}

impl SharedContext {
    /// Sends the request to `node` with its params as received.
    ///
    /// JSON-RPC errors from the node come back as [`ProxyError::Node`] and reach the caller
    /// with their code, message and data untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Node`] for any node failure.
    pub async fn forward(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        Ok(node.call(&request.method, request.params_or_empty()).await?)
    }

    /// Counts the kind of epoch argument found at `index`.
    pub fn record_input_epoch(&self, request: &JsonRpcRequest, index: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_input_epoch(&request.method, epoch_label(request, index));
        }
    }
}

/// Routes validated calls to the store-aware handlers, the subscription notifier, or
/// straight to the bound node.
pub struct ProxyEngine {
    ctx: Arc<SharedContext>,
    blocks: BlocksHandler,
    transactions: TransactionsHandler,
    logs: LogsHandler,
    relay: Option<Arc<dyn RelayPool>>,
}

impl ProxyEngine {
    #[must_use]
    pub fn new(
        backend: BackendKind,
        dispatcher: RequestDispatcher,
        limits: FilterLimits,
        relay: Option<Arc<dyn RelayPool>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let ctx = Arc::new(SharedContext {
            backend,
            dispatcher,
            validator: LogFilterValidator::new(limits),
            metrics,
        });

        Self {
            blocks: BlocksHandler::new(Arc::clone(&ctx)),
            transactions: TransactionsHandler::new(Arc::clone(&ctx)),
            logs: LogsHandler::new(Arc::clone(&ctx)),
            ctx,
            relay,
        }
    }

    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.ctx.backend
    }

    #[must_use]
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.ctx.dispatcher
    }

    /// Validates and serves one call. Client binding must already have run for every
    /// method that needs a node.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::InvalidRequest`] / [`ProxyError::MethodNotSupported`] from validation
    /// - [`ProxyError::SubscriptionsUnsupported`] for subscription calls without a notifier
    /// - any handler or node error
    pub async fn process_request(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        validate_request(self.ctx.backend, request)?;

        let method = request.method.as_str();
        if method == self.ctx.backend.subscribe_method() {
            return self.subscribe(ctx, request).await;
        }
        if method == self.ctx.backend.unsubscribe_method() {
            return Self::unsubscribe(ctx, request);
        }

        let node = ctx.node()?;
        match method {
            "cfx_getBlockByHash" => self.blocks.handle_block_by_hash(node, request).await,
            "cfx_getBlockByEpochNumber" => self.blocks.handle_block_by_epoch(node, request).await,
            "cfx_getBlockByBlockNumber" => self.blocks.handle_block_by_number(node, request).await,
            "cfx_getBlocksByEpoch" => self.blocks.handle_blocks_by_epoch(node, request).await,
            "cfx_getTransactionByHash" => {
                self.transactions.handle_transaction_by_hash(node, request).await
            }
            "cfx_getTransactionReceipt" => {
                self.transactions.handle_transaction_receipt(node, request).await
            }
            "cfx_getLogs" => self.logs.handle_cfx_logs(node, request).await,
            "eth_getLogs" => self.logs.handle_eth_logs(node, request).await,
            "cfx_sendRawTransaction" | "eth_sendRawTransaction" => {
                self.send_raw_transaction(node, request).await
            }
            _ => {
                if let Some(index) = epoch_param_index(method) {
                    self.ctx.record_input_epoch(request, index);
                }
                self.ctx.forward(node, request).await
            }
        }
    }

    async fn subscribe(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let notifier = ctx.notifier.as_ref().ok_or(ProxyError::SubscriptionsUnsupported)?;
        let kind = SubscriptionKind::from_params(request.params.as_ref())?;
        let node = ctx.node()?;

        let id = notifier.subscribe(node, kind).await?;
        Ok(Value::String(id))
    }

    fn unsubscribe(ctx: &RequestContext, request: &JsonRpcRequest) -> Result<Value, ProxyError> {
        let notifier = ctx.notifier.as_ref().ok_or(ProxyError::SubscriptionsUnsupported)?;
        let id = string_param(request, 0)
            .ok_or_else(|| ProxyError::InvalidParams("missing subscription id".into()))?;
        Ok(Value::Bool(notifier.unsubscribe(id)))
    }

    /// Forwards the transaction, then hands it to the relay pool. The relay outcome never
    /// changes the caller's result.
    async fn send_raw_transaction(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let result = self.ctx.forward(node, request).await?;

        if let (Some(relay), Some(raw)) = (&self.relay, string_param(request, 0)) {
            if relay.submit(raw.to_string()) == RelayOutcome::Full {
                warn!("transaction relay pool is full");
            }
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl CallHandler for ProxyEngine {
    async fn call(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        self.process_request(ctx, request).await
    }
}

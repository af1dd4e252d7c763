use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::{
    node::Node,
    proxy::{
        engine::SharedContext,
        errors::ProxyError,
        utils::{bool_param, epoch_param, quantity_param, string_param},
    },
    store::{StoreKey, StoreQuery},
    types::JsonRpcRequest,
};

/// Handler for block lookups answered from the store when possible.
pub struct BlocksHandler {
    ctx: Arc<SharedContext>,
}

impl BlocksHandler {
    #[must_use]
    pub fn new(ctx: Arc<SharedContext>) -> Self {
        Self { ctx }
    }

    /// Handles `cfx_getBlockByHash`. A hash that is not a string goes to the node as sent.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Node`] when delegation fails.
    pub async fn handle_block_by_hash(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let Some(hash) = string_param(request, 0) else {
            return self.ctx.forward(node, request).await;
        };
        let query = StoreQuery::new("cfx_getBlockByHash", StoreKey::BlockHash(hash.to_string()))
            .with_txs(bool_param(request, 1));

        self.dispatch(query, node, request).await
    }

    /// Handles `cfx_getBlockByEpochNumber`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::DataTooOld`] for pruned epochs or [`ProxyError::Node`] when
    /// delegation fails.
    pub async fn handle_block_by_epoch(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        self.ctx.record_input_epoch(request, 0);

        let Some(epoch) = epoch_param(request, 0) else {
            debug!(method = %request.method, "unparsable epoch, delegating");
            return self.ctx.forward(node, request).await;
        };
        let query = StoreQuery::new("cfx_getBlockByEpochNumber", StoreKey::Epoch(epoch))
            .with_txs(bool_param(request, 1));

        self.dispatch(query, node, request).await
    }

    /// Handles `cfx_getBlockByBlockNumber`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Node`] when delegation fails.
    pub async fn handle_block_by_number(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let Some(number) = quantity_param(request, 0) else {
            return self.ctx.forward(node, request).await;
        };
        let query = StoreQuery::new("cfx_getBlockByBlockNumber", StoreKey::BlockNumber(number))
            .with_txs(bool_param(request, 1));

        self.dispatch(query, node, request).await
    }

    /// Handles `cfx_getBlocksByEpoch`, returning the block hashes of one epoch.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::DataTooOld`] for pruned epochs or [`ProxyError::Node`] when
    /// delegation fails.
    pub async fn handle_blocks_by_epoch(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        self.ctx.record_input_epoch(request, 0);

        let Some(epoch) = epoch_param(request, 0) else {
            return self.ctx.forward(node, request).await;
        };
        let query = StoreQuery::new("cfx_getBlocksByEpoch", StoreKey::BlocksByEpoch(epoch));

        self.dispatch(query, node, request).await
    }

    async fn dispatch(
        &self,
        query: StoreQuery,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        if query.include_txs {
            if let Some(metrics) = &self.ctx.metrics {
                metrics.record_block_details(query.method);
            }
        }

        let dispatched =
            self.ctx.dispatcher.dispatch(&query, node, request.params_or_empty()).await?;
        Ok(dispatched.value)
    }
}

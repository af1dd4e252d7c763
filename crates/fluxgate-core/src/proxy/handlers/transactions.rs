use serde_json::Value;
use std::sync::Arc;

use crate::{
    node::Node,
    proxy::{
        dispatcher::Source,
        engine::SharedContext,
        errors::ProxyError,
        utils::{string_param, strip_store_log_fields},
    },
    store::{StoreKey, StoreQuery},
    types::JsonRpcRequest,
};

/// Handler for `cfx_getTransactionByHash` and `cfx_getTransactionReceipt`.
pub struct TransactionsHandler {
    ctx: Arc<SharedContext>,
}

impl TransactionsHandler {
    #[must_use]
    pub fn new(ctx: Arc<SharedContext>) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Returns [`ProxyError::Node`] when delegation fails.
    pub async fn handle_transaction_by_hash(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let Some(hash) = string_param(request, 0) else {
            return self.ctx.forward(node, request).await;
        };
        let key = StoreKey::TransactionHash(hash.to_string());
        let query = StoreQuery::new("cfx_getTransactionByHash", key);

        let dispatched =
            self.ctx.dispatcher.dispatch(&query, node, request.params_or_empty()).await?;
        Ok(dispatched.value)
    }

    /// Receipts served by the store have their logs reduced to the fields a node returns.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Node`] when delegation fails.
    pub async fn handle_transaction_receipt(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let Some(hash) = string_param(request, 0) else {
            return self.ctx.forward(node, request).await;
        };
        let key = StoreKey::Receipt(hash.to_string());
        let query = StoreQuery::new("cfx_getTransactionReceipt", key);

        let mut dispatched =
            self.ctx.dispatcher.dispatch(&query, node, request.params_or_empty()).await?;
        if dispatched.source == Source::Store {
            strip_store_log_fields(&mut dispatched.value);
        }
        Ok(dispatched.value)
    }
}

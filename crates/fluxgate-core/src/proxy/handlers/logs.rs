use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::{
    filter::LogFilter,
    node::Node,
    proxy::{engine::SharedContext, errors::ProxyError, utils::filter_param},
    store::{StoreKey, StoreQuery},
    types::{Epoch, JsonRpcRequest},
};

/// Handler for `cfx_getLogs` and `eth_getLogs`.
///
/// Filters are validated before the store or the node sees them. Empty results are always
/// `[]`, never `null`.
pub struct LogsHandler {
    ctx: Arc<SharedContext>,
}

impl LogsHandler {
    #[must_use]
    pub fn new(ctx: Arc<SharedContext>) -> Self {
        Self { ctx }
    }

    /// Validates and normalizes the epoch range against `node`, then tries the store. The
    /// node receives the normalized filter.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::InvalidParams`] when the filter does not decode
    /// - [`ProxyError::Filter`] when it violates the configured limits
    /// - [`ProxyError::DataTooOld`] when the store pruned the range
    pub async fn handle_cfx_logs(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let mut filter = filter_param(request)?;

        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_input_epoch("cfx_getLogs/from", epoch_label(filter.from_epoch));
            metrics.record_input_epoch("cfx_getLogs/to", epoch_label(filter.to_epoch));
        }

        self.ctx.validator.validate(&mut filter, &node.cfx_epochs()).await?;
        debug!(
            from = ?filter.from_epoch,
            to = ?filter.to_epoch,
            mode = %filter.mode(),
            "log filter validated"
        );

        let params = normalized_params(&filter)?;
        let query = StoreQuery::new("cfx_getLogs", StoreKey::Logs(filter));
        let dispatched = self.ctx.dispatcher.dispatch(&query, node, params).await?;
        Ok(non_null(dispatched.value))
    }

    /// Block tags are left for the node; the request goes out as sent.
    ///
    /// # Errors
    ///
    /// Same as [`Self::handle_cfx_logs`].
    pub async fn handle_eth_logs(
        &self,
        node: &Node,
        request: &JsonRpcRequest,
    ) -> Result<Value, ProxyError> {
        let filter = filter_param(request)?;
        self.ctx.validator.validate_eth(&filter)?;

        let query = StoreQuery::new("eth_getLogs", StoreKey::Logs(filter));
        let dispatched =
            self.ctx.dispatcher.dispatch(&query, node, request.params_or_empty()).await?;
        Ok(non_null(dispatched.value))
    }
}

fn epoch_label(epoch: Option<Epoch>) -> &'static str {
    epoch.map_or("default", |e| e.metric_label())
}

fn normalized_params(filter: &LogFilter) -> Result<Value, ProxyError> {
    let filter = serde_json::to_value(filter)
        .map_err(|e| ProxyError::Internal(format!("failed to encode log filter: {e}")))?;
    Ok(Value::Array(vec![filter]))
}

fn non_null(value: Value) -> Value {
    if value.is_null() {
        Value::Array(Vec::new())
    } else {
        value
    }
}

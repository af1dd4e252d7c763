use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{Interceptor, RequestContext};
use crate::{metrics::MetricsCollector, proxy::errors::ProxyError, types::JsonRpcRequest};

/// Records request count, latency and error type for every call, short-circuited or not.
pub struct MetricsInterceptor {
    metrics: Arc<MetricsCollector>,
}

impl MetricsInterceptor {
    #[must_use]
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn before(&self, _: &mut RequestContext, _: &JsonRpcRequest) -> Result<(), ProxyError> {
        Ok(())
    }

    fn after(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
        outcome: &Result<Value, ProxyError>,
    ) {
        let node = ctx.node.as_ref().map_or("none", |n| n.name());
        self.metrics.record_request(&request.method, node, outcome.is_ok(), ctx.elapsed_ms());

        if let Err(e) = outcome {
            self.metrics.record_proxy_error(&request.method, e);
        }
    }
}

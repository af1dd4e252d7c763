use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Interceptor, RequestContext};
use crate::{node::NodeError, proxy::errors::ProxyError, types::JsonRpcRequest};

/// Calls slower than this are logged at `info` even when they succeed.
const SLOW_CALL_MS: u64 = 1000;

/// One structured log line per call.
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn before(
        &self,
        ctx: &mut RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<(), ProxyError> {
        debug!(
            correlation_id = %ctx.correlation_id,
            caller = %ctx.caller,
            method = %request.method,
            "rpc call received"
        );
        Ok(())
    }

    fn after(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
        outcome: &Result<Value, ProxyError>,
    ) {
        let node = ctx.node.as_ref().map_or("none", |n| n.name());
        let latency_ms = ctx.elapsed_ms();

        match outcome {
            Ok(_) if latency_ms >= SLOW_CALL_MS => info!(
                correlation_id = %ctx.correlation_id,
                caller = %ctx.caller,
                method = %request.method,
                node,
                latency_ms,
                "slow rpc call"
            ),
            Ok(_) => debug!(
                correlation_id = %ctx.correlation_id,
                method = %request.method,
                node,
                latency_ms,
                "rpc call served"
            ),
            Err(ProxyError::Node(e)) if !matches!(e, NodeError::RpcError(_)) => warn!(
                correlation_id = %ctx.correlation_id,
                caller = %ctx.caller,
                method = %request.method,
                node,
                error = %e,
                latency_ms,
                "rpc call failed on node"
            ),
            Err(e) => debug!(
                correlation_id = %ctx.correlation_id,
                caller = %ctx.caller,
                method = %request.method,
                node,
                error = %e,
                latency_ms,
                "rpc call rejected"
            ),
        }
    }
}

use async_trait::async_trait;
use std::sync::Arc;

use super::{Interceptor, RequestContext};
use crate::{
    config::BackendKind,
    provider::RoutableClientProvider,
    proxy::{errors::ProxyError, validation::is_method_allowed},
    types::JsonRpcRequest,
};

/// Last stage of the chain: binds the node that will serve the call.
///
/// Unsubscribe calls only touch the connection's notifier and are not bound, and neither
/// are subscribe calls arriving without one (plain HTTP). Methods outside the allow-list
/// are left unbound so the engine answers them with "method not found" instead of a node
/// selection error.
pub struct ClientBindingInterceptor {
    backend: BackendKind,
    provider: Arc<dyn RoutableClientProvider>,
}

impl ClientBindingInterceptor {
    #[must_use]
    pub fn new(backend: BackendKind, provider: Arc<dyn RoutableClientProvider>) -> Self {
        Self { backend, provider }
    }

    fn needs_node(&self, ctx: &RequestContext, method: &str) -> bool {
        if method == self.backend.subscribe_method() {
            return ctx.notifier.is_some();
        }
        method != self.backend.unsubscribe_method() && is_method_allowed(self.backend, method)
    }
}

#[async_trait]
impl Interceptor for ClientBindingInterceptor {
    fn name(&self) -> &'static str {
        "client_binding"
    }

    async fn before(
        &self,
        ctx: &mut RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<(), ProxyError> {
        if !self.needs_node(ctx, &request.method) {
            return Ok(());
        }

        let node = self.provider.client_for(&ctx.caller, &request.method)?;
        tracing::trace!(caller = %ctx.caller, method = %request.method, node = %node.name(), "node bound");
        ctx.node = Some(node);
        Ok(())
    }
}

use std::sync::Arc;

use super::{ClientProvider, GroupKey};
use crate::{config::BackendKind, node::Node, proxy::errors::ProxyError};

/// A provider that knows which group each method belongs to.
pub trait RoutableClientProvider: Send + Sync {
    /// Group that serves `method`.
    fn group_for(&self, method: &str) -> GroupKey;

    fn provider(&self) -> &ClientProvider;

    /// Selects a node for `caller` in the group that serves `method`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NoHealthyClient`] when that group has no available node.
    fn client_for(&self, caller: &str, method: &str) -> Result<Arc<Node>, ProxyError> {
        self.provider().get_client(caller, self.group_for(method))
    }
}

/// Routing for the `cfx_*` surface.
pub struct CfxClientProvider {
    inner: ClientProvider,
}

impl CfxClientProvider {
    #[must_use]
    pub fn new(inner: ClientProvider) -> Self {
        Self { inner }
    }
}

impl RoutableClientProvider for CfxClientProvider {
    fn group_for(&self, method: &str) -> GroupKey {
        match method {
            "cfx_getLogs" => GroupKey::Logs,
            "cfx_subscribe" => GroupKey::Ws,
            _ => GroupKey::Default,
        }
    }

    fn provider(&self) -> &ClientProvider {
        &self.inner
    }
}

/// Routing for the Ethereum-compatible `eth_*` surface.
pub struct EthClientProvider {
    inner: ClientProvider,
}

impl EthClientProvider {
    #[must_use]
    pub fn new(inner: ClientProvider) -> Self {
        Self { inner }
    }
}

impl RoutableClientProvider for EthClientProvider {
    fn group_for(&self, method: &str) -> GroupKey {
        match method {
            "eth_getLogs" => GroupKey::Logs,
            "eth_subscribe" => GroupKey::Ws,
            _ => GroupKey::Default,
        }
    }

    fn provider(&self) -> &ClientProvider {
        &self.inner
    }
}

/// Wraps `provider` with the routing table of `backend`.
#[must_use]
pub fn routable(backend: BackendKind, provider: ClientProvider) -> Arc<dyn RoutableClientProvider> {
    match backend {
        BackendKind::Cfx => Arc::new(CfxClientProvider::new(provider)),
        BackendKind::Eth => Arc::new(EthClientProvider::new(provider)),
    }
}

//! Request shape checks and the per-backend method allow-list.

use std::{collections::HashSet, sync::LazyLock};

use crate::{config::BackendKind, types::JsonRpcRequest};

/// Longest method name accepted before the allow-list lookup.
const MAX_METHOD_LEN: usize = 64;

/// Methods answered from the store when possible.
pub const CFX_STORE_METHODS: &[&str] = &[
    "cfx_getBlockByHash",
    "cfx_getBlockByEpochNumber",
    "cfx_getBlockByBlockNumber",
    "cfx_getTransactionByHash",
    "cfx_getTransactionReceipt",
    "cfx_getBlocksByEpoch",
    "cfx_getLogs",
];

/// Methods forwarded verbatim to the bound node.
pub const CFX_PASSTHROUGH_METHODS: &[&str] = &[
    "cfx_gasPrice",
    "cfx_epochNumber",
    "cfx_getBalance",
    "cfx_getAdmin",
    "cfx_getSponsorInfo",
    "cfx_getStakingBalance",
    "cfx_getDepositList",
    "cfx_getVoteList",
    "cfx_getCollateralForStorage",
    "cfx_getCode",
    "cfx_getStorageAt",
    "cfx_getStorageRoot",
    "cfx_getBlockByHashWithPivotAssumption",
    "cfx_getBestBlockHash",
    "cfx_getNextNonce",
    "cfx_call",
    "cfx_estimateGasAndCollateral",
    "cfx_checkBalanceAgainstTransaction",
    "cfx_getSkippedBlocksByEpoch",
    "cfx_getAccount",
    "cfx_getInterestRate",
    "cfx_getAccumulateInterestRate",
    "cfx_getConfirmationRiskByHash",
    "cfx_getStatus",
    "cfx_getBlockRewardInfo",
    "cfx_clientVersion",
    "cfx_getSupplyInfo",
    "cfx_getAccountPendingInfo",
    "cfx_getAccountPendingTransactions",
    "cfx_getPoSEconomics",
];

pub const ETH_PASSTHROUGH_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_chainId",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getCode",
    "eth_call",
    "eth_estimateGas",
    "eth_getTransactionCount",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
    "eth_sendRawTransaction",
    "net_version",
];

static CFX_ALLOWED: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    CFX_STORE_METHODS
        .iter()
        .chain(CFX_PASSTHROUGH_METHODS)
        .chain(&["cfx_sendRawTransaction", "cfx_subscribe", "cfx_unsubscribe"])
        .copied()
        .collect()
});

static ETH_ALLOWED: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ETH_PASSTHROUGH_METHODS
        .iter()
        .chain(&["eth_getLogs", "eth_subscribe", "eth_unsubscribe"])
        .copied()
        .collect()
});

/// Check if a method is served for `backend` (O(1) lookup)
#[inline]
#[must_use]
pub fn is_method_allowed(backend: BackendKind, method: &str) -> bool {
    match backend {
        BackendKind::Cfx => CFX_ALLOWED.contains(method),
        BackendKind::Eth => ETH_ALLOWED.contains(method),
    }
}

/// Errors that occur during JSON-RPC request validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// JSON-RPC version is not "2.0".
    #[error("invalid json-rpc version: {0}")]
    InvalidVersion(String),

    /// Method name is empty, too long, or contains characters other than alphanumerics and
    /// underscore.
    #[error("invalid method name: {0}")]
    InvalidMethod(String),

    /// Requested method is not in the allow-list.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
}

/// Validates a JSON-RPC request before dispatch.
///
/// # Errors
///
/// Returns the first [`ValidationError`] the request violates.
pub fn validate_request(
    backend: BackendKind,
    request: &JsonRpcRequest,
) -> Result<(), ValidationError> {
    if request.jsonrpc != "2.0" {
        return Err(ValidationError::InvalidVersion(request.jsonrpc.to_string()));
    }

    let method = request.method.as_str();
    if method.is_empty() ||
        method.len() > MAX_METHOD_LEN ||
        !method.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ValidationError::InvalidMethod(method.to_string()));
    }

    if !is_method_allowed(backend, method) {
        return Err(ValidationError::MethodNotAllowed(method.to_string()));
    }

    Ok(())
}

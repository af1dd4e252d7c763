use serde_json::Value;

use super::errors::ProxyError;
use crate::{
    filter::LogFilter,
    types::{parse_quantity, Epoch, JsonRpcRequest},
};

/// Fields the store adds to logs that a node's receipt does not carry.
const STORE_ONLY_LOG_FIELDS: &[&str] = &[
    "blockHash",
    "epochNumber",
    "transactionHash",
    "transactionIndex",
    "logIndex",
    "transactionLogIndex",
];

/// Position of the epoch argument for methods that take one.
#[must_use]
pub fn epoch_param_index(method: &str) -> Option<usize> {
    match method {
        "cfx_epochNumber" |
        "cfx_getInterestRate" |
        "cfx_getAccumulateInterestRate" |
        "cfx_getSupplyInfo" |
        "cfx_getBlockByEpochNumber" |
        "cfx_getBlocksByEpoch" |
        "cfx_getSkippedBlocksByEpoch" |
        "cfx_getBlockRewardInfo" => Some(0),
        "cfx_getBalance" |
        "cfx_getAdmin" |
        "cfx_getSponsorInfo" |
        "cfx_getStakingBalance" |
        "cfx_getDepositList" |
        "cfx_getVoteList" |
        "cfx_getCollateralForStorage" |
        "cfx_getCode" |
        "cfx_getStorageRoot" |
        "cfx_getNextNonce" |
        "cfx_call" |
        "cfx_estimateGasAndCollateral" |
        "cfx_getAccount" => Some(1),
        "cfx_getStorageAt" => Some(2),
        "cfx_checkBalanceAgainstTransaction" => Some(5),
        _ => None,
    }
}

/// Metric label for the epoch argument at `index`: `default` when omitted or null,
/// `invalid` when it does not parse.
#[must_use]
pub fn epoch_label(request: &JsonRpcRequest, index: usize) -> &'static str {
    match request.param(index) {
        None | Some(Value::Null) => "default",
        Some(Value::String(raw)) => raw.parse::<Epoch>().map_or("invalid", |e| e.metric_label()),
        Some(_) => "invalid",
    }
}

#[must_use]
pub fn string_param(request: &JsonRpcRequest, index: usize) -> Option<&str> {
    request.param(index).and_then(Value::as_str)
}

/// Parsed epoch argument; `None` when missing or unparsable.
#[must_use]
pub fn epoch_param(request: &JsonRpcRequest, index: usize) -> Option<Epoch> {
    string_param(request, index).and_then(|raw| raw.parse().ok())
}

#[must_use]
pub fn quantity_param(request: &JsonRpcRequest, index: usize) -> Option<u64> {
    string_param(request, index).and_then(parse_quantity)
}

/// The `includeTxs` flag; absent means `false`.
#[must_use]
pub fn bool_param(request: &JsonRpcRequest, index: usize) -> bool {
    request.param(index).and_then(Value::as_bool).unwrap_or(false)
}

/// Decodes the log filter object in the first positional parameter.
///
/// # Errors
///
/// Returns [`ProxyError::InvalidParams`] when the filter is missing or malformed.
pub fn filter_param(request: &JsonRpcRequest) -> Result<LogFilter, ProxyError> {
    let raw = request
        .param(0)
        .ok_or_else(|| ProxyError::InvalidParams("missing value for required argument 0".into()))?;
    serde_json::from_value(raw.clone()).map_err(|e| ProxyError::InvalidParams(e.to_string()))
}

/// Removes store-only fields from the logs of a receipt served by the store.
pub fn strip_store_log_fields(receipt: &mut Value) {
    let Some(logs) = receipt.get_mut("logs").and_then(Value::as_array_mut) else {
        return;
    };
    for log in logs.iter_mut().filter_map(Value::as_object_mut) {
        for field in STORE_ONLY_LOG_FIELDS {
            log.remove(*field);
        }
    }
}

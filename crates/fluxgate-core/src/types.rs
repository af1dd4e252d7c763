//! Core type definitions for JSON-RPC traffic and chain parameters.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: Protocol conformance
//! - [`JsonRpcNotification`]: Server-pushed subscription payloads
//!
//! ## Chain Parameter Types
//! - [`Epoch`]: Numbered epoch or one of the named epoch tags
//! - [`Hash32`]: 32-byte block/transaction hash with strict parsing
//!
//! # Performance Notes
//!
//! The `jsonrpc` version field is a `Cow<'static, str>` and request ids are shared through
//! `Arc` so error responses can be built without deep-copying the id.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Cow, fmt, sync::Arc};

/// JSON-RPC protocol version constant to avoid repeated allocations.
/// Use `JSONRPC_VERSION_COW` for constructing requests/responses without allocation.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for JSON-RPC version - zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 request structure.
///
/// # Fields
///
/// - `jsonrpc`: Protocol version (always "2.0")
/// - `method`: RPC method name (e.g., `cfx_epochNumber`, `cfx_getLogs`)
/// - `params`: Optional method parameters as JSON value
/// - `id`: Request identifier that must be echoed in the response
///
/// # Example
///
/// ```
/// use fluxgate_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("cfx_epochNumber", None, json!(1));
///
/// assert_eq!(request.method, "cfx_epochNumber");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default = "default_request_id")]
    pub id: Arc<serde_json::Value>,
}

fn default_request_id() -> Arc<serde_json::Value> {
    Arc::new(serde_json::Value::Null)
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with zero allocation for the version string.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }

    /// Returns the positional parameter at `index`, if the params are an array.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&serde_json::Value> {
        self.params.as_ref().and_then(|p| p.as_array()).and_then(|arr| arr.get(index))
    }

    /// Returns the params as sent, or an empty array when absent.
    #[must_use]
    pub fn params_or_empty(&self) -> serde_json::Value {
        self.params.clone().unwrap_or_else(|| serde_json::Value::Array(Vec::new()))
    }
}

/// JSON-RPC 2.0 response structure.
///
/// A response contains either a `result` (success) or an `error` (failure), but never both.
/// A successful `null` result is represented as `Some(Value::Null)` and is serialized.
///
/// # Example
///
/// ```
/// use fluxgate_core::types::JsonRpcResponse;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let response = JsonRpcResponse::success(json!("0x1234"), Arc::new(json!(1)));
/// assert!(response.result.is_some());
/// assert!(response.error.is_none());
///
/// let response =
///     JsonRpcResponse::error(-32600, "invalid request".to_string(), Arc::new(json!(1)));
/// assert!(response.error.is_some());
/// assert!(response.result.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Creates a successful JSON-RPC response with zero allocation for the version string.
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    /// Creates an error JSON-RPC response with zero allocation for the version string.
    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<serde_json::Value>) -> Self {
        Self::from_error(JsonRpcError { code, message, data: None }, id)
    }

    /// Creates an error response carrying a complete error object (including `data`).
    #[must_use]
    pub fn from_error(error: JsonRpcError, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: None, error: Some(error), id }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 error object.
///
/// Standard error codes follow the JSON-RPC 2.0 convention:
///
/// - `-32700`: Parse error (invalid JSON)
/// - `-32600`: Invalid request (malformed JSON-RPC)
/// - `-32601`: Method not found
/// - `-32602`: Invalid params
/// - `-32603`: Internal error
/// - `-32000` to `-32099`: Server-defined errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Server-pushed subscription notification.
///
/// Exactly one of `result` and `error` is set in `params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: Cow<'static, str>,
    pub method: Cow<'static, str>,
    pub params: SubscriptionPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    pub subscription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn result(method: &'static str, subscription: &str, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            method: Cow::Borrowed(method),
            params: SubscriptionPayload {
                subscription: subscription.to_string(),
                result: Some(result),
                error: None,
            },
        }
    }

    #[must_use]
    pub fn error(method: &'static str, subscription: &str, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            method: Cow::Borrowed(method),
            params: SubscriptionPayload {
                subscription: subscription.to_string(),
                result: None,
                error: Some(error),
            },
        }
    }
}

/// Error type for hash parsing
#[derive(Debug, Clone, thiserror::Error)]
pub enum HashParseError {
    #[error("missing 0x prefix")]
    MissingPrefix,
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// 32-byte hash (used for transaction hashes, block hashes, etc.)
///
/// # Example
/// ```
/// use fluxgate_core::types::Hash32;
///
/// let hash: Hash32 = "0xabcd1234abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234"
///     .try_into()
///     .unwrap();
/// assert_eq!(hash.as_bytes()[0], 0xab);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// Returns the inner byte array.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl TryFrom<&str> for Hash32 {
    type Error = HashParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let hex_str = value.strip_prefix("0x").ok_or(HashParseError::MissingPrefix)?;

        let bytes = hex::decode(hex_str).map_err(|e| HashParseError::InvalidHex(e.to_string()))?;

        if bytes.len() != 32 {
            return Err(HashParseError::InvalidLength(bytes.len()));
        }

        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash32(arr))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Returns true if `value` is a canonical hash string: `0x` followed by exactly 64 hex digits.
///
/// Only canonical hashes are usable as store keys; anything else goes straight to a node so
/// the caller sees the node's own validation error.
#[must_use]
pub fn is_canonical_hash(value: &str) -> bool {
    value.len() == 66 && Hash32::try_from(value).is_ok()
}

/// Named epoch tags understood by the chain RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpochTag {
    Earliest,
    LatestCheckpoint,
    LatestFinalized,
    LatestConfirmed,
    LatestState,
    LatestMined,
}

impl EpochTag {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::LatestCheckpoint => "latest_checkpoint",
            Self::LatestFinalized => "latest_finalized",
            Self::LatestConfirmed => "latest_confirmed",
            Self::LatestState => "latest_state",
            Self::LatestMined => "latest_mined",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "earliest" => Self::Earliest,
            "latest_checkpoint" => Self::LatestCheckpoint,
            "latest_finalized" => Self::LatestFinalized,
            "latest_confirmed" => Self::LatestConfirmed,
            "latest_state" => Self::LatestState,
            "latest_mined" => Self::LatestMined,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid epoch: {0}")]
pub struct EpochParseError(pub String);

/// An epoch parameter: either a concrete number or a named tag.
///
/// Serializes to the same JSON form the chain RPC accepts (`"0x1a"` or `"latest_state"`).
///
/// ```
/// use fluxgate_core::types::{Epoch, EpochTag};
///
/// assert_eq!("0x10".parse::<Epoch>().unwrap(), Epoch::Number(16));
/// assert_eq!("latest_state".parse::<Epoch>().unwrap(), Epoch::Tag(EpochTag::LatestState));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Epoch {
    Number(u64),
    Tag(EpochTag),
}

impl Epoch {
    pub const LATEST_CHECKPOINT: Epoch = Epoch::Tag(EpochTag::LatestCheckpoint);
    pub const LATEST_STATE: Epoch = Epoch::Tag(EpochTag::LatestState);
    pub const LATEST_MINED: Epoch = Epoch::Tag(EpochTag::LatestMined);

    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Tag(_) => None,
        }
    }

    /// Label used for input-epoch metrics.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Tag(tag) => tag.as_str(),
        }
    }
}

impl std::str::FromStr for Epoch {
    type Err = EpochParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(tag) = EpochTag::parse(s) {
            return Ok(Self::Tag(tag));
        }
        parse_quantity(s).map(Self::Number).ok_or_else(|| EpochParseError(s.to_string()))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n:#x}"),
            Self::Tag(tag) => f.write_str(tag.as_str()),
        }
    }
}

impl Serialize for Epoch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Epoch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Parses a `0x`-prefixed hex quantity.
#[must_use]
pub fn parse_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

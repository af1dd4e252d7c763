//! Live event subscriptions.
//!
//! Many callers asking for the same stream from the same node share one upstream
//! subscription:
//!
//! ```text
//!   caller A ─┐                                     ┌─► queue A ─► Notifier (conn 1)
//!   caller B ─┼─ attach(node, kind) ─► one upstream ┼─► queue B ─► Notifier (conn 1)
//!   caller C ─┘                                     └─► queue C ─► Notifier (conn 2)
//! ```
//!
//! The [`SubscriptionMultiplexer`] owns the shared upstreams; a [`Notifier`] belongs to one
//! WebSocket connection and turns downstream items into JSON-RPC notifications.

pub mod multiplexer;
pub mod notifier;

pub use multiplexer::{DownstreamSubscription, SubscriptionKey, SubscriptionMultiplexer};
pub use notifier::Notifier;

use serde_json::{Map, Value};

use crate::{proxy::errors::ProxyError, types::EpochTag};

/// What an upstream subscription streams.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionKind {
    NewHeads,
    /// Only `latest_mined` and `latest_state` are served.
    Epochs(EpochTag),
    /// Log filter object, passed to the node as sent.
    Logs(Value),
}

impl SubscriptionKind {
    /// Parses the params of a subscribe call: `[name, options?]`.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::InvalidParams`] for a missing or unknown subscription name
    /// - [`ProxyError::SubscriptionsUnsupported`] for an epochs tag other than
    ///   `latest_mined` or `latest_state`
    pub fn from_params(params: Option<&Value>) -> Result<Self, ProxyError> {
        let args = params.and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
        let name = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProxyError::InvalidParams("missing subscription name".into()))?;
        let options = args.get(1).filter(|v| !v.is_null());

        match name {
            "newHeads" => Ok(Self::NewHeads),
            "epochs" => match options.map(|v| v.as_str()) {
                None | Some(Some("latest_mined")) => Ok(Self::Epochs(EpochTag::LatestMined)),
                Some(Some("latest_state")) => Ok(Self::Epochs(EpochTag::LatestState)),
                Some(_) => Err(ProxyError::SubscriptionsUnsupported),
            },
            "logs" => match options {
                None => Ok(Self::Logs(Value::Object(Map::new()))),
                Some(filter @ Value::Object(_)) => Ok(Self::Logs(filter.clone())),
                Some(other) => Err(ProxyError::InvalidParams(format!("invalid log filter: {other}"))),
            },
            other => Err(ProxyError::InvalidParams(format!("unsupported subscription: {other}"))),
        }
    }

    /// Metric and log label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewHeads => "newHeads",
            Self::Epochs(_) => "epochs",
            Self::Logs(_) => "logs",
        }
    }

    /// Params of the subscribe call sent to the node.
    #[must_use]
    pub fn upstream_params(&self) -> Value {
        match self {
            Self::NewHeads => Value::Array(vec![Value::from("newHeads")]),
            Self::Epochs(tag) => {
                Value::Array(vec![Value::from("epochs"), Value::from(tag.as_str())])
            }
            Self::Logs(filter) => Value::Array(vec![Value::from("logs"), filter.clone()]),
        }
    }

    /// Canonical form of the options: equal filters written with different key order
    /// share an upstream.
    #[must_use]
    pub fn normalized_params(&self) -> String {
        match self {
            Self::NewHeads => String::new(),
            Self::Epochs(tag) => tag.as_str().to_string(),
            Self::Logs(filter) => {
                let mut out = String::new();
                write_canonical(filter, &mut out);
                out
            }
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

//! # Metrics Architecture
//!
//! Every recording call goes through the `metrics` facade, so it is fire-and-forget:
//! a missing or failing recorder never changes an RPC outcome.
//!
//! The Prometheus recorder is installed once per process (`OnceLock`) and rendered by the
//! server's `/metrics` endpoint.
//!
//! ## Naming
//!
//! | Family | Labels |
//! |--------|--------|
//! | `rpc_requests_total`, `rpc_request_duration_seconds` | method, node |
//! | `rpc_store_hits_total`, `rpc_store_misses_total`, `rpc_store_hit_ratio` | method |
//! | `node_health`, `node_probe_duration_seconds` | node |
//! | `subscription_*` | kind |
//!
//! Node names are exposed in labels. Keep `/metrics` on an internal network if node names
//! reveal infrastructure.

use crate::{node::HealthState, proxy::errors::ProxyError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{borrow::Cow, sync::OnceLock};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[inline]
fn method_label(method: &str) -> Cow<'static, str> {
    match method {
        "cfx_getLogs" => Cow::Borrowed("cfx_getLogs"),
        "cfx_getBlockByHash" => Cow::Borrowed("cfx_getBlockByHash"),
        "cfx_getBlockByEpochNumber" => Cow::Borrowed("cfx_getBlockByEpochNumber"),
        "cfx_getBlockByBlockNumber" => Cow::Borrowed("cfx_getBlockByBlockNumber"),
        "cfx_getTransactionByHash" => Cow::Borrowed("cfx_getTransactionByHash"),
        "cfx_getTransactionReceipt" => Cow::Borrowed("cfx_getTransactionReceipt"),
        "cfx_getBlocksByEpoch" => Cow::Borrowed("cfx_getBlocksByEpoch"),
        "cfx_epochNumber" => Cow::Borrowed("cfx_epochNumber"),
        "cfx_getBalance" => Cow::Borrowed("cfx_getBalance"),
        "cfx_call" => Cow::Borrowed("cfx_call"),
        "cfx_sendRawTransaction" => Cow::Borrowed("cfx_sendRawTransaction"),
        "eth_getLogs" => Cow::Borrowed("eth_getLogs"),
        "eth_blockNumber" => Cow::Borrowed("eth_blockNumber"),
        _ => Cow::Owned(method.to_string()),
    }
}

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "prometheus recorder already installed, using a detached recorder"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Thin recording facade shared by every component.
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: init_prometheus_recorder() }
    }

    /// Record an RPC call served by the gateway
    pub fn record_request(&self, method: &str, node: &str, success: bool, latency_ms: u64) {
        let method = method_label(method);
        let node = node.to_string();

        counter!("rpc_requests_total", "method" => method.clone(), "node" => node.clone())
            .increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("rpc_request_duration_seconds", "method" => method.clone(), "node" => node)
            .record(latency_ms as f64 / 1000.0);

        if success {
            counter!("rpc_requests_success_total", "method" => method).increment(1);
        } else {
            counter!("rpc_requests_error_total", "method" => method).increment(1);
        }
    }

    /// Record a store lookup outcome and the resulting hit ratio for the method
    pub fn record_store_lookup(&self, method: &str, hit: bool, hits: u64, misses: u64) {
        let method = method_label(method);
        if hit {
            counter!("rpc_store_hits_total", "method" => method.clone()).increment(1);
        } else {
            counter!("rpc_store_misses_total", "method" => method.clone()).increment(1);
        }

        let total = hits + misses;
        if total > 0 {
            #[allow(clippy::cast_precision_loss)]
            gauge!("rpc_store_hit_ratio", "method" => method).set(hits as f64 / total as f64);
        }
    }

    /// Record a store failure that was not a plain miss
    pub fn record_store_unavailable(&self, method: &str) {
        counter!("rpc_store_unavailable_total", "method" => method_label(method)).increment(1);
    }

    /// Record the epoch argument shape callers use per method
    pub fn record_input_epoch(&self, method: &str, epoch_label: &'static str) {
        counter!(
            "rpc_input_epoch_total",
            "method" => method_label(method),
            "epoch" => epoch_label
        )
        .increment(1);
    }

    /// Record a block query that asked for full transaction details
    pub fn record_block_details(&self, method: &str) {
        counter!("rpc_block_details_total", "method" => method_label(method)).increment(1);
    }

    // Node health

    pub fn record_node_health(&self, node: &str, state: HealthState) {
        let value = match state {
            HealthState::Healthy => 1.0,
            HealthState::Unknown => 0.5,
            HealthState::Unhealthy | HealthState::Closed => 0.0,
        };
        gauge!("node_health", "node" => node.to_string()).set(value);
    }

    /// Record a health probe outcome and its latency
    pub fn record_health_check(&self, node: &str, success: bool, latency_ms: u64) {
        #[allow(clippy::cast_precision_loss)]
        histogram!("node_probe_duration_seconds", "node" => node.to_string())
            .record(latency_ms as f64 / 1000.0);

        if success {
            counter!("node_probe_success_total", "node" => node.to_string()).increment(1);
        } else {
            counter!("node_probe_failure_total", "node" => node.to_string()).increment(1);
        }
    }

    pub fn record_node_epoch(&self, node: &str, epoch: u64) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("node_epoch", "node" => node.to_string()).set(epoch as f64);
    }

    // Selection

    pub fn record_node_selection(&self, group: &'static str, node: &str, sticky: bool) {
        counter!(
            "provider_selection_total",
            "group" => group,
            "node" => node.to_string(),
            "sticky" => if sticky { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn record_no_healthy_client(&self, group: &'static str) {
        counter!("provider_no_healthy_client_total", "group" => group).increment(1);
    }

    // Rate limiting

    pub fn record_rate_limit(&self, allowed: bool) {
        if allowed {
            counter!("rpc_rate_limit_allowed_total").increment(1);
        } else {
            counter!("rpc_rate_limit_rejected_total").increment(1);
        }
    }

    pub fn record_rate_limit_bucket_count(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("rpc_rate_limit_buckets").set(count as f64);
    }

    // Subscriptions

    pub fn record_upstream_subscription(&self, kind: &'static str, opened: bool) {
        if opened {
            counter!("subscription_upstream_opened_total", "kind" => kind).increment(1);
            gauge!("subscription_upstream_active", "kind" => kind).increment(1.0);
        } else {
            counter!("subscription_upstream_closed_total", "kind" => kind).increment(1);
            gauge!("subscription_upstream_active", "kind" => kind).decrement(1.0);
        }
    }

    pub fn record_upstream_failure(&self, kind: &'static str) {
        counter!("subscription_upstream_failures_total", "kind" => kind).increment(1);
    }

    pub fn record_downstream_subscription(&self, kind: &'static str, attached: bool) {
        if attached {
            gauge!("subscription_downstream_active", "kind" => kind).increment(1.0);
        } else {
            gauge!("subscription_downstream_active", "kind" => kind).decrement(1.0);
        }
    }

    /// Record a notification dropped because a downstream queue was full
    pub fn record_dropped_notification(&self, kind: &'static str) {
        counter!("subscription_dropped_notifications_total", "kind" => kind).increment(1);
    }

    // Relay

    pub fn record_relay_submission(&self, accepted: bool) {
        if accepted {
            counter!("relay_submitted_total").increment(1);
        } else {
            counter!("relay_pool_full_total").increment(1);
        }
    }

    pub fn record_relay_delivery(&self, node: &str, success: bool) {
        counter!(
            "relay_delivery_total",
            "node" => node.to_string(),
            "success" => if success { "true" } else { "false" }
        )
        .increment(1);
    }

    // Transport

    #[allow(clippy::cast_precision_loss)]
    pub fn record_batch_request(&self, batch_size: usize, duration_ms: u64) {
        histogram!("rpc_batch_size").record(batch_size as f64);
        histogram!("rpc_batch_duration_seconds").record(duration_ms as f64 / 1000.0);
    }

    pub fn record_websocket_connection(&self, connected: bool) {
        if connected {
            gauge!("rpc_websocket_connections").increment(1.0);
        } else {
            gauge!("rpc_websocket_connections").decrement(1.0);
        }
    }

    /// Record a proxy error with type breakdown
    pub fn record_proxy_error(&self, method: &str, error: &ProxyError) {
        counter!(
            "rpc_proxy_errors_total",
            "method" => method_label(method),
            "error_type" => error.as_metric_str()
        )
        .increment(1);
    }

    /// Get current metrics as a string (for Prometheus endpoint)
    #[must_use]
    pub fn get_prometheus_metrics(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

use chrono::Utc;
use std::{sync::Arc, time::{Duration, Instant}};
use tokio::{sync::broadcast, time::interval};
use tracing::{info, warn};

use super::{
    client::NodeClient,
    errors::NodeError,
    status::{HealthState, StatusCell},
};
use crate::{
    config::{BackendKind, HealthCheckConfig},
    metrics::MetricsCollector,
    types::parse_quantity,
};

/// Probe settings shared by every node's monitor.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    pub interval: Duration,
    pub failure_threshold: u32,
    pub probe_timeout: Duration,
    pub backend: BackendKind,
}

impl HealthMonitor {
    #[must_use]
    pub fn from_config(config: &HealthCheckConfig, backend: BackendKind) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            failure_threshold: config.failure_threshold,
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            backend,
        }
    }

    /// Spawns the probe loop for one node. The loop is the only writer of `status`.
    ///
    /// The task ends when `shutdown_rx` fires; the exit is logged and never retried.
    #[must_use]
    pub fn start_with_shutdown(
        &self,
        name: Arc<str>,
        client: Arc<dyn NodeClient>,
        status: Arc<StatusCell>,
        metrics: Option<Arc<MetricsCollector>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(monitor.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor
                            .probe_once(&name, client.as_ref(), &status, metrics.as_deref())
                            .await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!(node = %name, "node monitor stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Runs one probe and publishes the resulting snapshot.
    pub async fn probe_once(
        &self,
        name: &str,
        client: &dyn NodeClient,
        status: &StatusCell,
        metrics: Option<&MetricsCollector>,
    ) {
        let (method, params) = self.backend.probe_request();
        let started = Instant::now();

        let probe = tokio::time::timeout(self.probe_timeout, client.call(method, params)).await;
        let outcome = match probe {
            Ok(Ok(value)) => value.as_str().and_then(parse_quantity).ok_or_else(|| {
                NodeError::InvalidResponse(format!("unexpected probe result: {value}"))
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NodeError::Timeout),
        };

        let latency = started.elapsed();
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = latency.as_millis() as u64;
        let at = Utc::now();

        let (previous, current) = match &outcome {
            Ok(epoch) => status.update(|s| s.after_success(*epoch, latency, at)),
            Err(e) => {
                let reason = e.to_string();
                status.update(|s| s.after_failure(self.failure_threshold, reason.clone(), at))
            }
        };

        if let Some(metrics) = metrics {
            metrics.record_health_check(name, outcome.is_ok(), latency_ms);
            metrics.record_node_health(name, current.state);
            if let Ok(epoch) = &outcome {
                metrics.record_node_epoch(name, *epoch);
            }
        }

        if previous.state != current.state {
            match current.state {
                HealthState::Healthy => {
                    info!(node = %name, epoch = ?current.epoch, latency_ms, "node became healthy");
                }
                HealthState::Unhealthy => warn!(
                    node = %name,
                    failures = current.consecutive_failures,
                    error = current.last_error.as_deref().unwrap_or_default(),
                    "node became unhealthy"
                ),
                HealthState::Unknown | HealthState::Closed => {}
            }
        } else if let Err(e) = &outcome {
            warn!(node = %name, failures = current.consecutive_failures, error = %e, "node probe failed");
        }
    }
}

//! Immutable node health snapshots and the cell that publishes them.
//!
//! A [`Status`] is never mutated after publication. The probe task derives the next value
//! from the current one and swaps it into the [`StatusCell`]; readers on the serving path get
//! an `Arc<Status>` with a single atomic load and can never observe a mix of two snapshots.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

/// Health classification of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No probe has completed yet.
    Unknown,
    Healthy,
    Unhealthy,
    /// The node was shut down; terminal.
    Closed,
}

impl HealthState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Closed => "closed",
        }
    }
}

/// One published health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub state: HealthState,
    pub last_probe: Option<DateTime<Utc>>,
    /// Latest epoch (or block height) the node reported.
    pub epoch: Option<u64>,
    #[serde(serialize_with = "serialize_latency")]
    pub latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

fn serialize_latency<S: serde::Serializer>(
    latency: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match latency {
        #[allow(clippy::cast_possible_truncation)]
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

impl Status {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            state: HealthState::Unknown,
            last_probe: None,
            epoch: None,
            latency: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Unknown and healthy nodes take traffic; a node is only skipped once condemned.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.state, HealthState::Healthy | HealthState::Unknown)
    }

    /// Next snapshot after a successful probe. One success is enough to recover.
    #[must_use]
    pub fn after_success(&self, epoch: u64, latency: Duration, at: DateTime<Utc>) -> Status {
        if self.state == HealthState::Closed {
            return self.clone();
        }
        Status {
            state: HealthState::Healthy,
            last_probe: Some(at),
            epoch: Some(epoch),
            latency: Some(latency),
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Next snapshot after a failed probe.
    ///
    /// The state only moves to `Unhealthy` once `threshold` consecutive failures accumulate.
    #[must_use]
    pub fn after_failure(&self, threshold: u32, error: String, at: DateTime<Utc>) -> Status {
        if self.state == HealthState::Closed {
            return self.clone();
        }
        let consecutive_failures = self.consecutive_failures.saturating_add(1);
        let state = if consecutive_failures >= threshold {
            HealthState::Unhealthy
        } else {
            self.state
        };
        Status {
            state,
            last_probe: Some(at),
            epoch: self.epoch,
            latency: self.latency,
            consecutive_failures,
            last_error: Some(error),
        }
    }

    #[must_use]
    pub fn closed(&self) -> Status {
        Status { state: HealthState::Closed, ..self.clone() }
    }
}

/// Copy-on-write cell holding the current [`Status`].
///
/// Writers replace the whole value; concurrent updates are applied with a
/// compare-and-swap loop so a `close` racing a probe is never lost.
pub struct StatusCell {
    inner: ArcSwap<Status>,
}

impl StatusCell {
    #[must_use]
    pub fn new(initial: Status) -> Self {
        Self { inner: ArcSwap::from_pointee(initial) }
    }

    /// Lock-free snapshot read.
    #[inline]
    #[must_use]
    pub fn load(&self) -> Arc<Status> {
        self.inner.load_full()
    }

    /// Derives and publishes the next snapshot, returning `(previous, published)`.
    pub fn update<F>(&self, f: F) -> (Arc<Status>, Arc<Status>)
    where
        F: Fn(&Status) -> Status,
    {
        let mut published = None;
        let previous = self.inner.rcu(|current| {
            let next = Arc::new(f(current));
            published = Some(Arc::clone(&next));
            next
        });
        let published = published.unwrap_or_else(|| self.inner.load_full());
        (previous, published)
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(Status::unknown())
    }
}

//! # Fluxgate Core
//!
//! Core library for the fluxgate JSON-RPC gateway: one endpoint in front of a pool of
//! Conflux (or Ethereum-compatible) nodes.
//!
//! This crate provides the foundational components for:
//!
//! - **[`node`]**: Node clients over HTTP and WebSocket, with a background health monitor
//!   per node publishing status snapshots.
//!
//! - **[`provider`]**: Method-group routing with sticky, rendezvous-hashed node selection
//!   per caller and failover when a node turns unhealthy.
//!
//! - **[`proxy`]**: Request validation, store-or-delegate dispatch and the handlers for
//!   block, transaction and log lookups.
//!
//! - **[`filter`]**: Log filter decoding and limit checks.
//!
//! - **[`store`]**: The optional indexed store consulted before the nodes.
//!
//! - **[`pubsub`]**: Shared upstream subscriptions fanned out to WebSocket callers.
//!
//! - **[`middleware`]**: The per-call interceptor chain: rate limiting, metrics, logging and
//!   client binding.
//!
//! - **[`relay`]**: Background broadcast of raw transactions to relay nodes.
//!
//! - **[`metrics`]**: Prometheus metrics collection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Gateway                            │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌──────────────┐  │
//! │  │ MiddlewareChain │─►│   ProxyEngine   │─►│ Dispatcher   │  │
//! │  └────────┬────────┘  └────────┬────────┘  └──────┬───────┘  │
//! │           │                    │                  │          │
//! │  ┌────────▼────────┐  ┌────────▼────────┐  ┌──────▼───────┐  │
//! │  │ ClientProvider  │  │ Notifier /      │  │ Store        │  │
//! │  │  default/logs/ws│  │ Multiplexer     │  │ (optional)   │  │
//! │  └────────┬────────┘  └────────┬────────┘  └──────────────┘  │
//! │           ▼                    ▼                             │
//! │      Node + HealthMonitor (one probe task per node)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod filter;
pub mod metrics;
pub mod middleware;
pub mod node;
pub mod provider;
pub mod proxy;
pub mod pubsub;
pub mod relay;
pub mod store;
pub mod types;

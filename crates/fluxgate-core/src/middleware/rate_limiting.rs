use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::broadcast;

use super::{Interceptor, RequestContext};
use crate::{
    config::RateLimitConfig, metrics::MetricsCollector, proxy::errors::ProxyError,
    types::JsonRpcRequest,
};

/// Token bucket rate limiter keyed by caller.
///
/// The bucket table is capped: once `max_buckets` callers are tracked, unknown callers are
/// rejected until idle buckets are cleaned up.
pub struct RateLimiter {
    buckets: Arc<DashMap<String, TokenBucket>>,
    max_tokens: u32,
    refill_rate: u32,
    cleanup_interval: Duration,
    bucket_ttl: Duration,
    max_buckets: usize,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl RateLimiter {
    const DEFAULT_MAX_BUCKETS: usize = 100_000;

    #[must_use]
    pub fn new(max_tokens: u32, refill_rate: u32) -> Self {
        Self::with_max_buckets(max_tokens, refill_rate, Self::DEFAULT_MAX_BUCKETS)
    }

    #[must_use]
    pub fn with_max_buckets(max_tokens: u32, refill_rate: u32, max_buckets: usize) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            max_tokens,
            refill_rate,
            cleanup_interval: Duration::from_secs(300),
            bucket_ttl: Duration::from_secs(300),
            max_buckets,
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::with_max_buckets(config.max_tokens, config.refill_rate, config.max_buckets)
    }

    /// Tokens a call to `method` costs.
    #[must_use]
    pub fn weight(method: &str) -> u32 {
        match method {
            "cfx_getLogs" | "eth_getLogs" => 2,
            _ => 1,
        }
    }

    /// Charges one call of `method` to `caller`.
    #[must_use]
    pub fn admit(&self, caller: &str, method: &str) -> bool {
        self.try_acquire(caller, Self::weight(method))
    }

    /// Charges `cost` tokens to `caller`. Rejects new callers when the table is full.
    #[must_use]
    pub fn try_acquire(&self, caller: &str, cost: u32) -> bool {
        let now = Instant::now();

        if let Some(mut bucket) = self.buckets.get_mut(caller) {
            return self.process_bucket(&mut bucket, now, cost);
        }

        if self.buckets.len() >= self.max_buckets {
            return false;
        }

        let mut bucket = self.buckets.entry(caller.to_string()).or_insert_with(|| TokenBucket {
            tokens: f64::from(self.max_tokens),
            last_refill: now,
            last_access: now,
        });

        self.process_bucket(&mut bucket, now, cost)
    }

    fn process_bucket(&self, bucket: &mut TokenBucket, now: Instant, cost: u32) -> bool {
        bucket.last_access = now;

        let max_tokens = f64::from(self.max_tokens);
        let elapsed = now.duration_since(bucket.last_refill);
        let tokens_to_add = (elapsed.as_secs_f64() * f64::from(self.refill_rate)).min(max_tokens);

        if tokens_to_add > 0.0 {
            bucket.tokens = (bucket.tokens + tokens_to_add).min(max_tokens);
            bucket.last_refill = now;
        }

        let cost = f64::from(cost);
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Periodically drops idle buckets until shutdown.
    pub fn start_cleanup_task(
        self: &Arc<Self>,
        metrics: Option<Arc<MetricsCollector>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.cleanup_interval);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = limiter.cleanup_old_buckets();
                        if removed > 0 {
                            tracing::debug!(removed, "dropped idle rate limit buckets");
                        }
                        if let Some(metrics) = &metrics {
                            metrics.record_rate_limit_bucket_count(limiter.bucket_count());
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("rate limit cleanup stopped");
                        break;
                    }
                }
            }
        })
    }

    #[must_use]
    pub fn cleanup_old_buckets(&self) -> usize {
        let now = Instant::now();
        let before_count = self.buckets.len();

        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_access) < self.bucket_ttl);

        before_count - self.buckets.len()
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[doc(hidden)]
    #[must_use]
    pub fn get_bucket_info(&self, key: &str) -> Option<(f64, Instant)> {
        self.buckets.get(key).map(|bucket| (bucket.tokens, bucket.last_access))
    }
}

/// First stage of the chain: rejects callers that ran out of tokens.
pub struct RateLimitInterceptor {
    limiter: Arc<RateLimiter>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RateLimitInterceptor {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { limiter, metrics }
    }

    fn record(&self, allowed: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(allowed);
        }
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn before(
        &self,
        ctx: &mut RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<(), ProxyError> {
        if ctx.in_batch {
            return Ok(());
        }

        let allowed = self.limiter.admit(&ctx.caller, &request.method);
        self.record(allowed);
        if allowed {
            Ok(())
        } else {
            tracing::debug!(caller = %ctx.caller, method = %request.method, "rate limited");
            Err(ProxyError::RateLimited)
        }
    }

    fn before_batch(
        &self,
        ctx: &RequestContext,
        requests: &[JsonRpcRequest],
    ) -> Result<(), ProxyError> {
        let cost = requests.iter().map(|r| RateLimiter::weight(&r.method)).sum();
        let allowed = self.limiter.try_acquire(&ctx.caller, cost);
        self.record(allowed);
        if allowed {
            Ok(())
        } else {
            tracing::debug!(caller = %ctx.caller, size = requests.len(), "batch rate limited");
            Err(ProxyError::RateLimited)
        }
    }
}

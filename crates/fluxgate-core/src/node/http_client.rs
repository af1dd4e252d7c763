use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;

use super::errors::NodeError;

/// Configuration for HTTP transport concurrency and timeout behavior.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent HTTP requests allowed per node
    pub concurrent_limit: usize,
    /// Permit acquisition timeout in milliseconds
    pub permit_timeout_ms: u64,
    /// Retries for 5xx answers and transport failures
    pub max_retries: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { concurrent_limit: 512, permit_timeout_ms: 500, max_retries: 2 }
    }
}

/// HTTP transport with semaphore-based concurrency control.
///
/// One instance per node. Bodies are passed as [`bytes::Bytes`] so retries never copy.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, NodeError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Sanitizes network errors so node addresses and credentials in URLs never leak to callers.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, NodeError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(64)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("fluxgate/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                NodeError::ConnectionFailed(format!("http client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            config,
        })
    }

    /// Sends an HTTP POST with a JSON body and returns the raw response body.
    ///
    /// # Errors
    ///
    /// - [`NodeError::Timeout`] if permit acquisition or the request times out
    /// - [`NodeError::ConcurrencyLimit`] if the semaphore is closed
    /// - [`NodeError::HttpError`] for non-success HTTP status codes
    /// - [`NodeError::ConnectionFailed`] for network-related failures
    pub async fn send_request(
        &self,
        url: &str,
        body: bytes::Bytes,
        timeout: Duration,
    ) -> Result<bytes::Bytes, NodeError> {
        let _permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            NodeError::Timeout
        })?
        .map_err(|_| NodeError::ConcurrencyLimit(url.to_string()))?;

        let mut retries = 0;

        loop {
            let result = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .body(body.clone())
                .timeout(timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.bytes().await.map_err(NodeError::Network);
                    } else if response.status().is_server_error() && retries < self.config.max_retries
                    {
                        retries += 1;
                        tokio::time::sleep(Duration::from_millis(100 * (1 << retries))).await;
                        continue;
                    }

                    let status = response.status().as_u16();
                    let mut text = response.text().await.unwrap_or_default();
                    if text.len() > 256 {
                        let mut cut = 256;
                        while !text.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        text.truncate(cut);
                        text.push_str("... (truncated)");
                    }
                    return Err(NodeError::HttpError(status, text));
                }
                Err(e) if e.is_timeout() => return Err(NodeError::Timeout),
                Err(_) if retries < self.config.max_retries => {
                    retries += 1;
                    tokio::time::sleep(Duration::from_millis(100 * (1 << retries))).await;
                }
                Err(e) => return Err(NodeError::ConnectionFailed(Self::sanitize_network_error(&e))),
            }
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}

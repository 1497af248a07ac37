//! HTTP transport for the collection service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::types::EventRecord;

use super::batch::{EventBatch, FlushSignal};
use super::{Endpoint, Transport};

/// reqwest-backed [`Transport`]
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a new transport from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("transport.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http_client,
                base_url,
            }),
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.inner.base_url, endpoint.path())
    }

    /// One POST, no retries
    async fn post_once(&self, endpoint: Endpoint, events: &[EventRecord]) -> Result<()> {
        let response = self
            .inner
            .http_client
            .post(self.url(endpoint))
            .json(&EventBatch { events })
            .send()
            .await
            .map_err(|e| Error::Transport {
                status: e.status().map(|s| s.as_u16()),
                message: format!("HTTP request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(Error::Transport {
            status: Some(status.as_u16()),
            message: error_text,
        })
    }

    /// Check if the collection service is reachable
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.inner.base_url);

        match self.inner.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// Send events, retrying transient failures (5xx, 429, network) with
    /// exponential backoff.
    async fn send(&self, endpoint: Endpoint, events: &[EventRecord]) -> Result<()> {
        let max_retries = self.inner.config.max_retries;
        let mut delay = Duration::from_millis(500);

        let mut attempt = 0;
        loop {
            match self.post_once(endpoint, events).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        endpoint = %endpoint,
                        error = %e,
                        "Retrying send (attempt {}/{}), waiting {:?}",
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs on its own thread with a blocking client, so the request is
    /// still attempted when the async runtime shuts down right after
    /// teardown. The thread is never joined.
    fn send_beacon(&self) {
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("beacon-unload".to_string())
            .spawn(move || {
                let url = format!("{}{}", inner.base_url, Endpoint::Batch.path());
                let client = match default_headers(&inner.config).and_then(|headers| {
                    reqwest::blocking::Client::builder()
                        .timeout(inner.config.timeout())
                        .default_headers(headers)
                        .build()
                        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
                }) {
                    Ok(client) => client,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unload beacon skipped");
                        return;
                    }
                };

                match client.post(&url).json(&FlushSignal::new()).send() {
                    Ok(response) => {
                        tracing::debug!(status = %response.status(), "Unload beacon sent")
                    }
                    Err(e) => tracing::debug!(error = %e, "Unload beacon failed"),
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Could not start unload beacon");
        }
    }
}

/// Headers sent with every request
fn default_headers(config: &TransportConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(api_key) = &config.api_key {
        let auth_value = format!("Bearer {}", api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );
    }

    if let Some(client_id) = &config.client_id {
        headers.insert(
            "X-Client-ID",
            HeaderValue::from_str(client_id)
                .map_err(|e| Error::Config(format!("invalid client_id: {}", e)))?,
        );
    }

    Ok(headers)
}

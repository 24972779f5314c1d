//! HTTP implementation of the fetch primitive.
//!
//! This module provides [`HttpFetcher`], the real network beneath both cache
//! tiers. It buffers every response body so responses can be copied into a
//! bucket or parsed by the response cache.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{Fetcher, Request, Response};
use crate::error::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Network fetcher backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    initial_backoff: Duration,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    async fn send_once(&self, request: &Request) -> Result<reqwest::Response, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }
        builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                FetchError::Connection(e.to_string())
            } else {
                FetchError::Network(e)
            }
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.send_once(request).await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RATE_LIMIT_RETRIES));
                }
                warn!(
                    url = %request.url,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "Fetched");

            return Ok(Response {
                status,
                headers,
                body,
            });
        }
    }
}

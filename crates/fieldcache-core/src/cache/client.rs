//! Cache-accelerated fetch wrapper.
//!
//! [`CachedClient`] is the only way callers reach the network through the
//! response cache. GET requests are served from memory when possible and fall
//! back to the last stored value when the network fails; everything else
//! goes straight to the fetcher.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::manager::{cache_key, AppCache};
use crate::error::FetchError;
use crate::net::{Fetcher, Request};

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Defaults to GET.
    pub method: Option<Method>,
    /// Only feeds the cache key. Encode anything the server needs into the
    /// URL itself.
    pub params: BTreeMap<String, Value>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchOptions {
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn is_cacheable(&self) -> bool {
        self.method.as_ref().map_or(true, |m| *m == Method::GET)
    }
}

#[derive(Debug, Clone)]
enum Body {
    Json(Value),
    Raw(Bytes),
}

/// Result of [`CachedClient::cached_fetch`].
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub ok: bool,
    pub status: StatusCode,
    /// Served from the response cache without touching the network.
    pub from_cache: bool,
    /// Served from the response cache because the network call failed.
    pub from_error: bool,
    body: Body,
}

impl CachedResponse {
    fn cached(data: Value, from_error: bool) -> Self {
        Self {
            ok: true,
            status: StatusCode::OK,
            from_cache: true,
            from_error,
            body: Body::Json(data),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.body {
            Body::Json(value) => serde_json::from_value(value.clone()),
            Body::Raw(bytes) => serde_json::from_slice(bytes),
        }
    }

    pub fn text(&self) -> String {
        match &self.body {
            Body::Json(value) => value.to_string(),
            Body::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Fetch wrapper that consults an owned [`AppCache`] before the network.
pub struct CachedClient<F> {
    fetcher: F,
    cache: Arc<AppCache>,
    base: Option<Url>,
}

impl<F: Fetcher> CachedClient<F> {
    pub fn new(fetcher: F, cache: Arc<AppCache>) -> Self {
        Self {
            fetcher,
            cache,
            base: None,
        }
    }

    /// Resolve relative URLs against `base`.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    pub fn cache(&self) -> &Arc<AppCache> {
        &self.cache
    }

    fn resolve(&self, url: &str) -> Result<Url, FetchError> {
        let resolved = match self.base {
            Some(ref base) => base.join(url),
            None => Url::parse(url),
        };
        resolved.map_err(|e| FetchError::InvalidRequest(format!("{}: {}", url, e)))
    }

    pub async fn cached_fetch(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<CachedResponse, FetchError> {
        let cacheable = options.is_cacheable();
        let key = cache_key(url, &options.params);

        if cacheable {
            if let Some(data) = self.cache.get(&key) {
                debug!(url, "Served from response cache");
                return Ok(CachedResponse::cached(data, false));
            }
        }

        let method = options.method.unwrap_or(Method::GET);
        let mut request = Request::new(method, self.resolve(url)?).with_headers(options.headers);
        if let Some(body) = options.body {
            request = request.with_body(body);
        }

        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) if cacheable => {
                if let Some(data) = self.cache.get(&key) {
                    warn!(url, error = %e, "Network failed, serving cached response");
                    return Ok(CachedResponse::cached(data, true));
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let ok = response.ok();
        let status = response.status;
        if cacheable && ok {
            match response.json_body::<Value>() {
                Ok(data) => {
                    self.cache.set(&key, &data, None);
                    return Ok(CachedResponse {
                        ok,
                        status,
                        from_cache: false,
                        from_error: false,
                        body: Body::Json(data),
                    });
                }
                Err(e) => debug!(url, error = %e, "Response is not JSON, not caching"),
            }
        }

        Ok(CachedResponse {
            ok,
            status,
            from_cache: false,
            from_error: false,
            body: Body::Raw(response.body),
        })
    }

    /// Fetch every URL concurrently, caching each success. Waits for all of
    /// them to settle; individual failures are logged and counted.
    pub async fn preload(&self, urls: &[String]) -> PreloadReport {
        let results = join_all(urls.iter().map(|url| async move {
            let result = self.cached_fetch(url, FetchOptions::default()).await;
            (url, result)
        }))
        .await;

        let mut report = PreloadReport::default();
        for (url, result) in results {
            match result {
                Ok(response) if response.ok => report.succeeded += 1,
                Ok(response) => {
                    let status = response.status.as_u16();
                    warn!(url = %url, status, "Preload got error status");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Preload failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Preload finished"
        );
        report
    }
}

impl<F: Fetcher + 'static> CachedClient<F> {
    /// Run [`preload`](Self::preload) as a detached task.
    pub fn spawn_preload(self: &Arc<Self>, urls: Vec<String>) -> JoinHandle<PreloadReport> {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.preload(&urls).await })
    }
}

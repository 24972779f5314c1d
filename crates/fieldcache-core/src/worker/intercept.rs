use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{StatusCode, Url};
use serde_json::json;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

use super::events::{
    Notification, Platform, WorkerMessage, WorkerReply, BACKGROUND_SYNC_TAG, EXPLORE_ACTION,
};
use super::storage::CacheStorage;
use super::strategy::{Classifier, Route, Strategy};
use crate::config::WorkerConfig;
use crate::error::FetchError;
use crate::net::{Fetcher, Request, Response};

const NOT_AVAILABLE_OFFLINE: &str = "Resource not available offline";
const SERVICE_UNAVAILABLE: &str = "Service unavailable";
const OFFLINE_MESSAGE: &str = "You are offline. Check your connection and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting to activate.
    Installed,
    Activating,
    Activated,
    /// Install failed; this worker will never serve.
    Redundant,
}

/// The current bucket as seen from inside a strategy. Storage failures are
/// logged and treated as misses or skipped writes.
#[derive(Clone)]
struct BucketHandle {
    storage: Arc<dyn CacheStorage>,
    name: Arc<str>,
}

impl BucketHandle {
    async fn lookup(&self, request: &Request) -> Option<Response> {
        let result = match self.storage.open(&self.name).await {
            Ok(bucket) => bucket.lookup(request).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            warn!(bucket = %self.name, url = %request.url, error = %e, "Bucket lookup failed");
            None
        })
    }

    async fn store(&self, request: &Request, response: &Response) {
        let result = match self.storage.open(&self.name).await {
            Ok(bucket) => bucket.put(request, response).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(bucket = %self.name, url = %request.url, error = %e, "Bucket write failed");
        }
    }
}

/// Intercepting worker.
///
/// Owns one versioned bucket, classifies each request it sees and serves it
/// through the matching [`Strategy`]. Until activated it intercepts nothing.
pub struct InterceptWorker {
    config: WorkerConfig,
    origin: Url,
    classifier: Classifier,
    bucket: BucketHandle,
    network: Arc<dyn Fetcher>,
    platform: Arc<dyn Platform>,
    state: Mutex<WorkerState>,
    skip_waiting: AtomicBool,
    skip_waiting_signal: Notify,
}

impl InterceptWorker {
    pub fn new(
        config: WorkerConfig,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let bucket = BucketHandle {
            storage,
            name: Arc::from(config.cache_version.as_str()),
        };
        Self {
            classifier: Classifier::from_config(&config),
            config,
            origin,
            bucket,
            network,
            platform,
            state: Mutex::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            skip_waiting_signal: Notify::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: WorkerState) {
        let mut current = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(from = ?*current, to = ?state, "Worker state change");
        *current = state;
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket.name
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .with_context(|| format!("Invalid path {:?} for origin {}", path, self.origin))
    }

    // ===== Lifecycle =====

    /// Install, wait for skip-waiting or the waiting timeout, then activate.
    pub async fn run_lifecycle(&self) -> Result<()> {
        self.install().await?;
        self.wait_for_activation().await;
        self.activate().await?;
        Ok(())
    }

    /// Seed the bucket with the static manifest. Either every listed
    /// resource is stored or none is.
    pub async fn install(&self) -> Result<()> {
        self.set_state(WorkerState::Installing);
        match self.precache().await {
            Ok(count) => {
                info!(bucket = %self.bucket.name, resources = count, "Worker installed");
                self.set_state(WorkerState::Installed);
                self.skip_waiting();
                Ok(())
            }
            Err(e) => {
                error!(bucket = %self.bucket.name, error = %e, "Worker install failed");
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize> {
        let bucket = self.bucket.storage.open(&self.bucket.name).await?;
        let requests = self
            .config
            .static_manifest
            .iter()
            .map(|path| self.resolve(path).map(Request::get))
            .collect::<Result<Vec<_>>>()?;

        let responses = try_join_all(requests.iter().map(|request| async move {
            let response = self
                .network
                .fetch(request)
                .await
                .with_context(|| format!("Failed to fetch {}", request.url))?;
            if !response.ok() {
                bail!("{} returned {}", request.url, response.status);
            }
            Ok::<_, anyhow::Error>(response)
        }))
        .await?;

        for (request, response) in requests.iter().zip(&responses) {
            if let Err(e) = bucket.put(request, response).await {
                self.discard_bucket().await;
                return Err(e.context(format!("Failed to store {}", request.url)));
            }
        }
        Ok(requests.len())
    }

    /// Drop a partially seeded bucket so a failed install leaves nothing
    /// behind.
    async fn discard_bucket(&self) {
        if let Err(e) = self.bucket.storage.delete(&self.bucket.name).await {
            warn!(bucket = %self.bucket.name, error = %e, "Failed to discard partial bucket");
        }
    }

    /// End the waiting phase as soon as possible.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
        self.skip_waiting_signal.notify_one();
    }

    async fn wait_for_activation(&self) {
        if self.skip_waiting.load(Ordering::SeqCst) {
            return;
        }
        let timeout = self.config.waiting_timeout();
        if tokio::time::timeout(timeout, self.skip_waiting_signal.notified())
            .await
            .is_err()
        {
            debug!(timeout_secs = timeout.as_secs(), "Waiting phase timed out");
        }
    }

    /// Delete every bucket but the current one, then take over open pages.
    /// Returns the names of the deleted buckets.
    pub async fn activate(&self) -> Result<Vec<String>> {
        if self.state() == WorkerState::Redundant {
            bail!("Cannot activate a worker whose install failed");
        }
        self.set_state(WorkerState::Activating);

        let storage = &self.bucket.storage;
        let names = storage.keys().await.context("Failed to list buckets")?;
        let mut deleted = Vec::new();
        for name in names.into_iter().filter(|name| **name != *self.bucket.name) {
            if storage
                .delete(&name)
                .await
                .with_context(|| format!("Failed to delete bucket {}", name))?
            {
                info!(bucket = %name, "Deleted stale bucket");
                deleted.push(name);
            }
        }

        self.platform
            .claim_clients()
            .await
            .context("Failed to claim clients")?;
        self.set_state(WorkerState::Activated);
        info!(bucket = %self.bucket.name, "Worker activated");
        Ok(deleted)
    }

    // ===== Fetch interception =====

    pub async fn handle_fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if self.state() != WorkerState::Activated {
            return self.network.fetch(request).await;
        }

        match self.classifier.classify(request) {
            Route::Passthrough => self.network.fetch(request).await,
            Route::Intercept(strategy) => {
                debug!(url = %request.url, ?strategy, "Intercepted");
                Ok(self.respond(strategy, request).await)
            }
        }
    }

    async fn respond(&self, strategy: Strategy, request: &Request) -> Response {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        }
    }

    async fn cache_first(&self, request: &Request) -> Response {
        if let Some(cached) = self.bucket.lookup(request).await {
            return cached;
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.bucket.store(request, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Cache-first miss while offline");
                Response::text(StatusCode::NOT_FOUND, NOT_AVAILABLE_OFFLINE)
            }
        }
    }

    async fn network_first(&self, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.bucket.store(request, &response).await;
                }
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network failed, trying bucket");
                match self.bucket.lookup(request).await {
                    Some(cached) => cached,
                    None => self.offline_fallback(request).await,
                }
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &Request) -> Response {
        let cached = self.bucket.lookup(request).await;

        // Detached: once a cached copy is returned nobody waits on this
        let revalidation = tokio::spawn(revalidate(
            Arc::clone(&self.network),
            self.bucket.clone(),
            request.clone(),
            cached.clone(),
        ));

        if let Some(cached) = cached {
            return cached;
        }

        match revalidation.await {
            Ok(Some(response)) => response,
            Ok(None) => self.offline_fallback(request).await,
            Err(e) => {
                error!(url = %request.url, error = %e, "Revalidation task failed");
                self.offline_fallback(request).await
            }
        }
    }

    /// Response for a request that neither the network nor the bucket could
    /// serve.
    async fn offline_fallback(&self, request: &Request) -> Response {
        if self.classifier.is_api(request) {
            return Response::json(
                StatusCode::SERVICE_UNAVAILABLE,
                &json!({
                    "error": "offline",
                    "offline": true,
                    "message": OFFLINE_MESSAGE,
                }),
            );
        }

        if request.is_navigation() {
            match self.resolve(&self.config.offline_document) {
                Ok(url) => {
                    if let Some(document) = self.bucket.lookup(&Request::get(url)).await {
                        return document;
                    }
                }
                Err(e) => warn!(error = %e, "Offline document path is invalid"),
            }
        }

        Response::text(StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE)
    }

    // ===== Events =====

    pub async fn handle_sync(&self, tag: &str) {
        if tag == BACKGROUND_SYNC_TAG {
            self.sync_offline_mutations().await;
        } else {
            debug!(tag, "Ignoring unknown sync tag");
        }
    }

    /// Hook for replaying mutations made while offline. Nothing is queued
    /// yet, so there is nothing to send.
    async fn sync_offline_mutations(&self) {
        info!("Background sync: no queued offline mutations");
    }

    pub async fn handle_push(&self, payload: Option<&str>) -> Result<Notification> {
        let notification = Notification::for_push(payload);
        self.platform
            .show_notification(&notification)
            .await
            .context("Failed to show notification")?;
        Ok(notification)
    }

    pub async fn handle_notification_click(&self, tag: &str, action: Option<&str>) -> Result<()> {
        self.platform.close_notification(tag).await;
        if action == Some(EXPLORE_ACTION) {
            let url = self.resolve(&self.config.community_path)?;
            self.platform
                .open_window(&url)
                .await
                .context("Failed to open community view")?;
        }
        Ok(())
    }

    /// Handle a page message. Every message is acknowledged on `reply`.
    pub fn handle_message(
        &self,
        message: &serde_json::Value,
        reply: Option<oneshot::Sender<WorkerReply>>,
    ) {
        match WorkerMessage::from_json(message) {
            WorkerMessage::SkipWaiting => {
                info!("Skip waiting requested by page");
                self.skip_waiting();
            }
            WorkerMessage::Unknown => debug!(%message, "Unrecognised page message"),
        }

        if let Some(reply) = reply {
            if reply.send(WorkerReply::ready()).is_err() {
                debug!("Page went away before the reply");
            }
        }
    }
}

async fn revalidate(
    network: Arc<dyn Fetcher>,
    bucket: BucketHandle,
    request: Request,
    cached: Option<Response>,
) -> Option<Response> {
    match network.fetch(&request).await {
        Ok(response) => {
            if response.ok() {
                bucket.store(&request, &response).await;
            }
            Some(response)
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Revalidation failed, keeping cached copy");
            cached
        }
    }
}

#[async_trait]
impl Fetcher for InterceptWorker {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.handle_fetch(request).await
    }
}

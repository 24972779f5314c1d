//! Test doubles for the fetch primitive, bucket storage and the worker host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::error::FetchError;
use crate::net::{Fetcher, Request, Response};
use crate::worker::events::{Notification, Platform};
use crate::worker::storage::{Bucket, CacheStorage, MemoryStorage};

#[derive(Clone)]
enum Outcome {
    Respond(Response),
    Fail,
    Hang,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Scripted fetcher keyed by absolute URL. Unscripted URLs fail like a
/// dropped connection.
#[derive(Default)]
pub(crate) struct MockFetcher {
    outcomes: Mutex<HashMap<String, Outcome>>,
    calls: Mutex<HashMap<String, usize>>,
    hook: Mutex<Option<Hook>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self, url: &str, outcome: Outcome) {
        self.outcomes.lock().unwrap().insert(url.to_string(), outcome);
    }

    pub(crate) fn respond(&self, url: &str, response: Response) {
        self.script(url, Outcome::Respond(response));
    }

    pub(crate) fn respond_json(&self, url: &str, value: Value) {
        self.respond(url, Response::json(StatusCode::OK, &value));
    }

    pub(crate) fn respond_text(&self, url: &str, body: &str) {
        self.respond(url, Response::text(StatusCode::OK, body));
    }

    pub(crate) fn fail(&self, url: &str) {
        self.script(url, Outcome::Fail);
    }

    /// Never complete requests for `url`.
    pub(crate) fn hang(&self, url: &str) {
        self.script(url, Outcome::Hang);
    }

    /// Run `hook` on every fetch, before it resolves.
    pub(crate) fn on_fetch(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url.as_str();
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook();
        }

        let outcome = self.outcomes.lock().unwrap().get(url).cloned();
        match outcome {
            Some(Outcome::Respond(response)) => Ok(response),
            Some(Outcome::Hang) => std::future::pending().await,
            Some(Outcome::Fail) | None => Err(FetchError::Connection(format!(
                "connection refused: {}",
                url
            ))),
        }
    }
}

#[derive(Default)]
struct Faults {
    /// Puts allowed before every further put fails.
    puts_left: Mutex<Option<usize>>,
    lookups: AtomicBool,
    put_attempts: AtomicUsize,
}

impl Faults {
    fn check_put(&self) -> anyhow::Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let mut left = self.puts_left.lock().unwrap();
        match left.as_mut() {
            Some(0) => bail!("disk full"),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory storage whose buckets can be told to fail writes or reads.
#[derive(Default)]
pub(crate) struct FaultyStorage {
    inner: MemoryStorage,
    faults: Arc<Faults>,
}

impl FaultyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Let `n` more puts succeed, then fail the rest.
    pub(crate) fn fail_puts_after(&self, n: usize) {
        *self.faults.puts_left.lock().unwrap() = Some(n);
    }

    pub(crate) fn fail_lookups(&self) {
        self.faults.lookups.store(true, Ordering::SeqCst);
    }

    pub(crate) fn put_attempts(&self) -> usize {
        self.faults.put_attempts.load(Ordering::SeqCst)
    }
}

struct FaultyBucket {
    inner: Arc<dyn Bucket>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Bucket for FaultyBucket {
    async fn put(&self, request: &Request, response: &Response) -> anyhow::Result<()> {
        self.faults.check_put()?;
        self.inner.put(request, response).await
    }

    async fn lookup(&self, request: &Request) -> anyhow::Result<Option<Response>> {
        if self.faults.lookups.load(Ordering::SeqCst) {
            bail!("bucket unreadable");
        }
        self.inner.lookup(request).await
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        self.inner.keys().await
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &str) -> anyhow::Result<Arc<dyn Bucket>> {
        Ok(Arc::new(FaultyBucket {
            inner: self.inner.open(name).await?,
            faults: self.faults.clone(),
        }))
    }

    async fn delete(&self, name: &str) -> anyhow::Result<bool> {
        self.inner.delete(name).await
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        self.inner.keys().await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlatformEvent {
    Claimed,
    Opened(Url),
    Shown(Notification),
    Closed(String),
}

/// Platform that records every call.
#[derive(Default)]
pub(crate) struct RecordingPlatform {
    events: Mutex<Vec<PlatformEvent>>,
}

impl RecordingPlatform {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: PlatformEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn claim_clients(&self) -> anyhow::Result<()> {
        self.record(PlatformEvent::Claimed);
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> anyhow::Result<()> {
        self.record(PlatformEvent::Opened(url.clone()));
        Ok(())
    }

    async fn show_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.record(PlatformEvent::Shown(notification.clone()));
        Ok(())
    }

    async fn close_notification(&self, tag: &str) {
        self.record(PlatformEvent::Closed(tag.to_string()));
    }
}

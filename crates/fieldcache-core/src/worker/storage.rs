//! Named, versioned bucket storage used by the worker.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::net::{Request, Response};

/// One named store of request/response snapshots keyed by
/// [`Request::identity`].
#[async_trait]
pub trait Bucket: Send + Sync {
    async fn put(&self, request: &Request, response: &Response) -> Result<()>;

    async fn lookup(&self, request: &Request) -> Result<Option<Response>>;

    /// Identities of every stored request.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// The set of buckets, addressed by name.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if needed.
    async fn open(&self, name: &str) -> Result<Arc<dyn Bucket>>;

    /// Delete a bucket and everything in it. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Names of every existing bucket.
    async fn keys(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryBucket {
    entries: Mutex<HashMap<String, Response>>,
}

impl MemoryBucket {
    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Response>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("bucket lock poisoned"))
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn put(&self, request: &Request, response: &Response) -> Result<()> {
        self.entries()?.insert(request.identity(), response.clone());
        Ok(())
    }

    async fn lookup(&self, request: &Request) -> Result<Option<Response>> {
        Ok(self.entries()?.get(&request.identity()).cloned())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Process-lifetime storage. Used for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryStorage {
    buckets: Mutex<BTreeMap<String, Arc<MemoryBucket>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn buckets(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Arc<MemoryBucket>>>> {
        self.buckets
            .lock()
            .map_err(|_| anyhow!("storage lock poisoned"))
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Bucket>> {
        let bucket: Arc<dyn Bucket> = self
            .buckets()?
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(bucket)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.buckets()?.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.buckets()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, StatusCode};

    fn request(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage = MemoryStorage::new();
        let bucket = storage.open("v1").await.unwrap();
        bucket
            .put(&request("https://a.test/"), &Response::text(StatusCode::OK, "home"))
            .await
            .unwrap();

        let reopened = storage.open("v1").await.unwrap();
        let hit = reopened.lookup(&request("https://a.test/")).await.unwrap();
        assert_eq!(hit.unwrap().text_body(), "home");
        assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_identity_includes_method() {
        let storage = MemoryStorage::new();
        let bucket = storage.open("v1").await.unwrap();
        let get = request("https://a.test/api/teams");
        bucket.put(&get, &Response::text(StatusCode::OK, "teams")).await.unwrap();

        let head = get.clone().with_method(Method::HEAD);
        assert!(bucket.lookup(&head).await.unwrap().is_none());
        assert!(bucket.lookup(&get).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let storage = MemoryStorage::new();
        storage.open("v1").await.unwrap();
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }
}

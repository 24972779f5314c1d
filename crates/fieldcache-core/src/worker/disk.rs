//! Disk-backed bucket storage.
//!
//! Each bucket is a directory under the storage root and each entry a JSON
//! file named after the SHA-256 of its request identity, so long URLs still
//! fit within file name limits. The identity itself is kept inside the entry.
//! Entries are wrapped in a timestamped envelope so their age can be shown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::storage::{Bucket, CacheStorage};
use crate::net::{Request, Response};

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    /// Coarse age for listings: minutes, then hours, then days.
    pub fn age_display(&self) -> String {
        let minutes = (Utc::now() - self.cached_at).num_minutes();
        match minutes {
            // Also covers clock skew
            m if m < 1 => "just now".to_string(),
            m if m < 60 => format!("{}m ago", m),
            m if m < 1440 => format!("{}h ago", m / 60),
            m => format!("{}d ago", m / 1440),
        }
    }
}

/// Serializable form of a stored response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub identity: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Base64 of the body bytes.
    pub body: String,
}

impl StoredResponse {
    fn capture(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            identity: request.identity(),
            status: response.status.as_u16(),
            headers,
            body: STANDARD.encode(&response.body),
        }
    }

    fn restore(&self) -> Result<Response> {
        let status = StatusCode::from_u16(self.status)
            .with_context(|| format!("Invalid stored status {}", self.status))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(header = %name, "Skipping unreadable stored header"),
            }
        }

        let body = STANDARD
            .decode(&self.body)
            .context("Failed to decode stored body")?;

        Ok(Response {
            status,
            headers,
            body: body.into(),
        })
    }
}

/// One line of a bucket listing.
#[derive(Debug, Clone)]
pub struct EntryAge {
    pub identity: String,
    pub status: u16,
    pub age: String,
}

pub struct DiskBucket {
    dir: PathBuf,
}

impl DiskBucket {
    fn entry_path(&self, identity: &str) -> PathBuf {
        let digest = Sha256::digest(identity.as_bytes());
        self.dir.join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    async fn load(&self, path: &Path) -> Result<Option<CachedData<StoredResponse>>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read bucket entry: {}", path.display()))
            }
        };

        let cached = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse bucket entry: {}", path.display()))?;
        Ok(Some(cached))
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e).context("Failed to list bucket"),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub async fn entry_ages(&self) -> Result<Vec<EntryAge>> {
        let mut ages = Vec::new();
        for path in self.entry_files().await? {
            if let Some(cached) = self.load(&path).await? {
                ages.push(EntryAge {
                    identity: cached.data.identity.clone(),
                    status: cached.data.status,
                    age: cached.age_display(),
                });
            }
        }
        ages.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(ages)
    }
}

#[async_trait]
impl Bucket for DiskBucket {
    async fn put(&self, request: &Request, response: &Response) -> Result<()> {
        let cached = CachedData::new(StoredResponse::capture(request, response));
        let contents = serde_json::to_string_pretty(&cached)?;
        let path = self.entry_path(&cached.data.identity);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write bucket entry: {}", path.display()))?;
        Ok(())
    }

    async fn lookup(&self, request: &Request) -> Result<Option<Response>> {
        let path = self.entry_path(&request.identity());
        match self.load(&path).await? {
            Some(cached) => Ok(Some(cached.data.restore()?)),
            None => Ok(None),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.entry_files().await? {
            if let Some(cached) = self.load(&path).await? {
                keys.push(cached.data.identity);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Bucket storage rooted in a directory, one subdirectory per bucket.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create bucket root: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Bucket names become directory names, so keep them to a safe alphabet.
    fn validate_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            bail!("Invalid bucket name: {:?}", name);
        }
        Ok(())
    }

    pub fn bucket(&self, name: &str) -> Result<DiskBucket> {
        Self::validate_name(name)?;
        Ok(DiskBucket {
            dir: self.root.join(name),
        })
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Bucket>> {
        let bucket = self.bucket(name)?;
        tokio::fs::create_dir_all(&bucket.dir)
            .await
            .with_context(|| format!("Failed to create bucket: {}", name))?;
        Ok(Arc::new(bucket))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let bucket = self.bucket(name)?;
        match tokio::fs::remove_dir_all(&bucket.dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete bucket: {}", name)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .context("Failed to list buckets")?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reqwest::header;

    fn request(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    #[test]
    fn test_age_display() {
        let fresh = CachedData::new(());
        assert_eq!(fresh.age_display(), "just now");

        let mut old = CachedData::new(());
        old.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(old.age_display(), "1h ago");

        old.cached_at = Utc::now() - Duration::hours(30);
        assert_eq!(old.age_display(), "1d ago");
    }

    #[tokio::test]
    async fn test_put_lookup_preserves_response() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(tmp.path().to_path_buf()).unwrap();
        let bucket = storage.open("fieldcache-v1").await.unwrap();

        let req = request("https://club.example/icons/icon-192.png");
        let response = Response::new(StatusCode::OK, vec![0x89, 0x50, 0x4e, 0x47])
            .with_header(header::CONTENT_TYPE, "image/png");
        bucket.put(&req, &response).await.unwrap();

        let restored = bucket.lookup(&req).await.unwrap().unwrap();
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.body, response.body);
        assert_eq!(restored.headers.get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(bucket.keys().await.unwrap(), vec![req.identity()]);
    }

    #[tokio::test]
    async fn test_long_urls_are_stored() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(tmp.path().to_path_buf()).unwrap();
        let bucket = storage.open("v1").await.unwrap();

        let url = format!("https://club.example/api/teams?q={}", "a".repeat(300));
        let req = request(&url);
        bucket
            .put(&req, &Response::text(StatusCode::OK, "teams"))
            .await
            .unwrap();

        let restored = bucket.lookup(&req).await.unwrap().unwrap();
        assert_eq!(restored.text_body(), "teams");
        assert_eq!(bucket.keys().await.unwrap(), vec![req.identity()]);
        let ages = storage.bucket("v1").unwrap().entry_ages().await.unwrap();
        assert_eq!(ages[0].identity, req.identity());
    }

    #[tokio::test]
    async fn test_lookup_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(tmp.path().to_path_buf()).unwrap();
        let bucket = storage.open("v1").await.unwrap();
        assert!(bucket.lookup(&request("https://club.example/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete_buckets() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(tmp.path().to_path_buf()).unwrap();
        storage.open("v1").await.unwrap();
        storage.open("v2").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["v1", "v2"]);
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_names() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(tmp.path().to_path_buf()).unwrap();
        assert!(storage.open("../escape").await.is_err());
        assert!(storage.open("").await.is_err());
    }

    #[tokio::test]
    async fn test_entry_ages() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(tmp.path().to_path_buf()).unwrap();
        let bucket = storage.open("v1").await.unwrap();
        bucket
            .put(&request("https://club.example/"), &Response::text(StatusCode::OK, "home"))
            .await
            .unwrap();

        let ages = storage.bucket("v1").unwrap().entry_ages().await.unwrap();
        assert_eq!(ages.len(), 1);
        assert_eq!(ages[0].identity, "GET https://club.example/");
        assert_eq!(ages[0].status, 200);
        assert_eq!(ages[0].age, "just now");
    }
}

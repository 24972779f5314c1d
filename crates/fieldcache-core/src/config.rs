//! Configuration for both cache tiers.
//!
//! Configuration is stored at `~/.config/fieldcache/config.json`. Every field
//! has a default, so a missing or partial file is fine. The origin can be
//! overridden with the `FIELDCACHE_ORIGIN` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::cache::ttl::{TtlRule, TtlRules};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fieldcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding [`Config::origin`]
pub const ORIGIN_ENV: &str = "FIELDCACHE_ORIGIN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin the worker is installed for; manifest paths resolve against it.
    pub origin: String,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            worker: WorkerConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the active bucket. Bumping it retires every other bucket on
    /// the next activation.
    pub cache_version: String,
    pub api_prefix: String,
    /// Path prefixes always served cache-first.
    pub asset_prefixes: Vec<String>,
    /// Root-relative paths seeded into the bucket at install.
    pub static_manifest: Vec<String>,
    pub offline_document: String,
    pub community_path: String,
    /// How long a freshly installed worker waits before activating when
    /// nobody asks it to skip waiting.
    pub waiting_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_version: "fieldcache-v1".to_string(),
            api_prefix: "/api/".to_string(),
            asset_prefixes: vec!["/icons/".to_string(), "/images/".to_string()],
            static_manifest: [
                "/",
                "/community",
                "/offline.html",
                "/manifest.json",
                "/icons/icon-192.png",
                "/icons/icon-512.png",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            offline_document: "/offline.html".to_string(),
            community_path: "/community".to_string(),
            waiting_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn waiting_timeout(&self) -> Duration {
        Duration::from_secs(self.waiting_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub cleanup_interval_secs: u64,
    pub default_ttl_secs: u64,
    /// Checked in order; the first rule whose pattern occurs in the key wins.
    pub ttl_rules: Vec<TtlRule>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let rules = TtlRules::default();
        Self {
            max_size: 100,
            cleanup_interval_secs: 60,
            default_ttl_secs: rules.default_ttl().as_secs(),
            ttl_rules: rules.rules().to_vec(),
        }
    }
}

impl CacheConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn ttl_rules(&self) -> TtlRules {
        TtlRules::new(
            self.ttl_rules.clone(),
            Duration::from_secs(self.default_ttl_secs),
        )
    }
}

/// `<base>/fieldcache`, where `base` is one of the platform directories.
fn app_dir(base: Option<PathBuf>, kind: &str) -> Result<PathBuf> {
    base.map(|dir| dir.join(APP_NAME))
        .with_context(|| format!("No {} directory on this platform", kind))
}

impl Config {
    /// Read the default config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = app_dir(dirs::config_dir(), "config")?.join(CONFIG_FILE);
        let mut config = Self::load_from(&path)?;
        if let Some(origin) = std::env::var(ORIGIN_ENV).ok().filter(|o| !o.is_empty()) {
            config.origin = origin;
        }
        Ok(config)
    }

    /// Read `path`, or fall back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Malformed config at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Cannot read {}", path.display())),
        }
    }

    /// Root directory for persistent worker buckets.
    pub fn bucket_dir(&self) -> Result<PathBuf> {
        Ok(app_dir(dirs::cache_dir(), "cache")?.join("buckets"))
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin: {}", self.origin))
    }
}

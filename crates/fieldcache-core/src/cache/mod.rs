//! In-process response cache.
//!
//! This module provides:
//! - `AppCache`: keyed JSON values with per-category TTL, bounded capacity,
//!   LRU eviction and hit/miss/eviction statistics
//! - `CachedClient`: the fetch wrapper callers go through to get
//!   cache-accelerated reads and cache fallback on network failure
//! - `TtlRules`: ordered URL-pattern rules assigning a TTL to each key
//!
//! The cache is an owned object: construct it, hand it to whatever issues
//! requests, and shut down its sweeper when done.

pub mod client;
pub mod manager;
pub mod ttl;

pub use client::{CachedClient, CachedResponse, FetchOptions, PreloadReport};
pub use manager::{cache_key, AppCache, CacheStats, SweeperHandle};
pub use ttl::{TtlRule, TtlRules};

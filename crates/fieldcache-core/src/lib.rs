//! Client-side resilience and caching layer.
//!
//! Two cooperating tiers that share no state:
//! - [`worker`]: an intercepting worker that classifies every outgoing
//!   request and serves it through one of three caching strategies backed by
//!   a single versioned bucket.
//! - [`cache`]: an in-process response cache with per-category TTLs, bounded
//!   capacity and LRU eviction, wrapped around the fetch primitive.
//!
//! Neither tier coordinates with the other; a response may be stale in one
//! and fresh in the other.

pub mod cache;
pub mod config;
pub mod error;
pub mod net;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{AppCache, CacheStats, CachedClient, CachedResponse, FetchOptions};
pub use config::Config;
pub use error::FetchError;
pub use net::{Destination, Fetcher, HttpFetcher, Request, Response};
pub use worker::{InterceptWorker, Route, Strategy, WorkerState};

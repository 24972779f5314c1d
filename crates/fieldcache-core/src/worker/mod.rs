//! Intercepting worker with a persistent, versioned bucket.
//!
//! This module provides:
//! - `InterceptWorker`: lifecycle (install, wait, activate), request
//!   interception and the three caching strategies
//! - `Classifier`: the ordered rules mapping a request to a `Route`
//! - `CacheStorage`/`Bucket`: the bucket API, in memory or on disk
//! - Page messages, push notifications and the `Platform` hooks
//!
//! Only one bucket version is ever kept; activation deletes the rest.

pub mod disk;
pub mod events;
pub mod intercept;
pub mod storage;
pub mod strategy;

pub use disk::{CachedData, DiskStorage};
pub use events::{Notification, Platform, WorkerMessage, WorkerReply};
pub use intercept::{InterceptWorker, WorkerState};
pub use storage::{Bucket, CacheStorage, MemoryStorage};
pub use strategy::{Classifier, Route, Strategy};

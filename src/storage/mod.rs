//! Storage collaborators for the cache layer.
//!
//! The layer persists cached entries through a [`CacheStorage`]
//! implementation: an associative byte-blob store keyed by opaque strings,
//! with a per-entry time-to-live. This module ships
//! [`memory::InMemoryStorage`], a fast process-local store backed by
//! [`moka`].
//!
//! Failure handling is deliberately lenient: a failing `get` is treated by
//! the layer as a miss, and a failing `set` is logged while the response
//! completes normally.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::CacheError;

#[async_trait]
pub trait CacheStorage: Send + Sync + Clone + 'static {
    /// Fetches the blob stored under `key`.
    ///
    /// Returns `Ok(None)` when nothing is stored or the entry has expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores a blob under `key` for `valid_for`.
    ///
    /// Returns once the entry is visible to subsequent `get`s; callers may
    /// treat the write as fire-and-forget.
    async fn set(&self, key: String, value: Bytes, valid_for: Duration) -> Result<(), CacheError>;
}

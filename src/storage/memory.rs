use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use std::time::{Duration, SystemTime};

use super::CacheStorage;
use crate::error::CacheError;

/// Advisory cap on the aggregate size of stored blobs, in bytes.
const DEFAULT_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

/// An in-memory [`CacheStorage`] implementation backed by [`moka`].
///
/// The store is cheap to clone and shares a single underlying cache. Each
/// blob carries its own expiry, checked on read; eviction is weighted by
/// blob size against the configured aggregate limit.
#[derive(Clone)]
pub struct InMemoryStorage {
    cache: Cache<String, StoredBlob>,
}

#[derive(Clone)]
struct StoredBlob {
    value: Bytes,
    expires_at: SystemTime,
}

impl InMemoryStorage {
    /// Creates a store with the default 100 MiB aggregate size limit.
    pub fn new() -> Self {
        Self::with_size_limit(DEFAULT_SIZE_LIMIT)
    }

    /// Creates a store capped at `size_limit` bytes of blob data.
    pub fn with_size_limit(size_limit: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(size_limit)
            .weigher(|_key: &String, blob: &StoredBlob| {
                blob.value.len().try_into().unwrap_or(u32::MAX)
            })
            .build();
        Self { cache }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        match self.cache.get(key).await {
            Some(blob) => {
                if SystemTime::now() >= blob.expires_at {
                    self.cache.invalidate(key).await;
                    return Ok(None);
                }
                Ok(Some(blob.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: String, value: Bytes, valid_for: Duration) -> Result<(), CacheError> {
        if valid_for.is_zero() {
            return Ok(());
        }

        let stored = StoredBlob {
            value,
            expires_at: SystemTime::now() + valid_for,
        };
        self.cache.insert(key, stored).await;
        Ok(())
    }
}

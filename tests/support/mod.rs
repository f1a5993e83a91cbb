#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Method, StatusCode, Uri};
use tower_response_cache::prelude::*;
use tower_response_cache::CacheError;

/// Storage wrapper that counts `get`/`set` calls and records the last TTL.
///
/// Seeding bypasses the counters so tests can assert on the calls the layer
/// itself makes.
#[derive(Clone, Default)]
pub struct CountingStorage {
    inner: InMemoryStorage,
    gets: Arc<AtomicUsize>,
    sets: Arc<AtomicUsize>,
    last_ttl: Arc<Mutex<Option<Duration>>>,
}

impl CountingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn last_ttl(&self) -> Option<Duration> {
        *self.last_ttl.lock().unwrap()
    }

    /// Waits for the spawned response-store writes to land.
    pub async fn wait_for_sets(&self, target: usize) {
        for _ in 0..100 {
            if self.sets() >= target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {target} storage writes");
    }

    pub async fn seed(&self, key: &str, entry: &CachedEntry, ttl: Duration) {
        let encoded = BincodeCodec.encode(entry).expect("encode seeded entry");
        self.inner
            .set(key.to_owned(), encoded, ttl)
            .await
            .expect("seed entry");
    }
}

#[async_trait]
impl CacheStorage for CountingStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: String, value: Bytes, valid_for: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        *self.last_ttl.lock().unwrap() = Some(valid_for);
        self.inner.set(key, value, valid_for).await
    }
}

pub fn base_key(method: &Method, uri: &Uri) -> String {
    DefaultKeyProvider::new().base_key(method, uri)
}

pub fn cached_response(
    status: StatusCode,
    headers: &[(&str, &str)],
    body: &[u8],
) -> CachedEntry {
    cached_response_at(Utc::now(), status, headers, body)
}

pub fn cached_response_at(
    created: DateTime<Utc>,
    status: StatusCode,
    headers: &[(&str, &str)],
    body: &[u8],
) -> CachedEntry {
    CachedEntry::Response(CachedResponse {
        created,
        status,
        headers: headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
            .collect(),
        body: SegmentedBody::new(vec![Bytes::copy_from_slice(body)]),
    })
}

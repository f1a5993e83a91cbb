//! Cached entry types stored under the cache key space.
//!
//! Two shapes share the same key space: a captured response, and a Vary
//! indirection record that points lookups at variant keys derived from the
//! same base key. Entries are immutable once stored; replacement is an
//! insert under the same key.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Tagged variant stored by the cache.
#[derive(Debug, Clone)]
pub enum CachedEntry {
    Response(CachedResponse),
    VaryRules(CachedVaryByRules),
}

/// A captured upstream response: status, header snapshot, segmented body.
///
/// Headers keep their stored spelling and insertion order; repeated names
/// appear once per value. Case-insensitive lookups go through
/// [`CachedResponse::header_map`].
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub created: DateTime<Utc>,
    pub status: StatusCode,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: SegmentedBody,
}

impl CachedResponse {
    /// Rebuilds an `http::HeaderMap` from the stored snapshot.
    ///
    /// Pairs that no longer parse as valid header names or values are
    /// skipped rather than failing the whole entry.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

/// Indirection record telling lookups which request material selects the
/// stored variant: the listed header names and query keys feed the variant
/// key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedVaryByRules {
    pub vary_key_prefix: String,
    pub headers: Vec<String>,
    pub query_keys: Vec<String>,
}

impl CachedVaryByRules {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.query_keys.is_empty()
    }

    /// Whether these rules cover the same normalized header and query sets.
    pub fn matches(&self, headers: &[String], query_keys: &[String]) -> bool {
        self.headers == headers && self.query_keys == query_keys
    }
}

/// An ordered list of body segments plus the recorded total length.
///
/// Replay is non-destructive: segments are reference-counted byte slices, so
/// independent readers can walk the list concurrently.
#[derive(Debug, Clone, Default)]
pub struct SegmentedBody {
    segments: Vec<Bytes>,
    length: u64,
}

impl SegmentedBody {
    pub fn new(segments: Vec<Bytes>) -> Self {
        let length = segments.iter().map(|s| s.len() as u64).sum();
        Self { segments, length }
    }

    /// Invariant: `length` equals the sum of segment lengths.
    pub(crate) fn from_parts(segments: Vec<Bytes>, length: u64) -> Self {
        debug_assert_eq!(
            segments.iter().map(|s| s.len() as u64).sum::<u64>(),
            length
        );
        Self { segments, length }
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<Bytes> {
        self.segments.get(index).cloned()
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Copies the segments into one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.length as usize);
        for segment in &self.segments {
            buf.extend_from_slice(segment);
        }
        Bytes::from(buf)
    }
}

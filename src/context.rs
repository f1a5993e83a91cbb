//! Per-request state threaded through the caching flow.

use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, Uri};
use std::time::Duration;

use crate::entry::{CachedResponse, CachedVaryByRules};

/// Mutable state owned by a single request.
///
/// Constructed at request entry, mutated only by that request's flow, and
/// discarded when the response completes. Lookup results, parsed response
/// timing material, and the should-cache decision all accumulate here.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub request_headers: HeaderMap,
    pub base_key: String,
    pub vary_query_keys: Vec<String>,
    pub cached_vary_rules: Option<CachedVaryByRules>,
    pub cached_response: Option<CachedResponse>,
    pub cached_response_headers: Option<HeaderMap>,
    pub cached_entry_age: Option<Duration>,
    pub response_time: DateTime<Utc>,
    pub response_date: Option<DateTime<Utc>>,
    pub response_expires: Option<DateTime<Utc>>,
    pub response_max_age: Option<Duration>,
    pub response_shared_max_age: Option<Duration>,
    pub cached_response_valid_for: Option<Duration>,
    pub should_cache_response: bool,
    pub response_started: bool,
    storage_vary_key: Option<String>,
    capture_installed: bool,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, request_headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            request_headers,
            base_key: String::new(),
            vary_query_keys: Vec::new(),
            cached_vary_rules: None,
            cached_response: None,
            cached_response_headers: None,
            cached_entry_age: None,
            response_time: Utc::now(),
            response_date: None,
            response_expires: None,
            response_max_age: None,
            response_shared_max_age: None,
            cached_response_valid_for: None,
            should_cache_response: false,
            response_started: false,
            storage_vary_key: None,
            capture_installed: false,
        }
    }

    /// The key the captured response will be stored under: the variant key
    /// when Vary rules apply, the base key otherwise.
    pub fn storage_key(&self) -> &str {
        self.storage_vary_key.as_deref().unwrap_or(&self.base_key)
    }

    pub(crate) fn set_storage_vary_key(&mut self, key: String) {
        self.storage_vary_key = Some(key);
    }

    /// Records that the capture stream has been installed on this request.
    ///
    /// Installing twice is a programming error and fails fast.
    pub fn mark_capture_installed(&mut self) {
        assert!(
            !self.capture_installed,
            "response capture installed twice for a single request"
        );
        self.capture_installed = true;
    }

    pub fn capture_installed(&self) -> bool {
        self.capture_installed
    }
}

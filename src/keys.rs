//! Cache key derivation.
//!
//! A request resolves to a *base key* built from its method and path. When a
//! Vary indirection record exists under the base key, the record's header
//! names and query keys select request material that is folded into a
//! *variant key*. Equivalent rules must produce identical keys across
//! processes, so names are sorted and uppercased before concatenation while
//! values are kept verbatim.

use http::header::HeaderName;
use http::{HeaderMap, Method, Uri};

use crate::entry::CachedVaryByRules;

/// Separator between key sections.
pub const KEY_DELIMITER: char = '\u{1e}';
/// Separator introducing the header and query sections of a variant key.
pub const KEY_SUBDELIMITER: char = '\u{1f}';

const VALUE_SEPARATOR: &str = ",";

/// Request extension listing the query keys a response varies by.
///
/// Upstream handlers attach this to the request (or response) extensions;
/// the layer reads it while finalizing headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaryByQueryKeys(pub Vec<String>);

/// Strategy used to derive cache keys from requests.
///
/// `lookup_vary_keys` returns the candidate variant keys probed on a Vary
/// indirection hit, in order; the default is the single storage key.
pub trait CacheKeyProvider: Send + Sync + Clone + 'static {
    fn base_key(&self, method: &Method, uri: &Uri) -> String;

    fn storage_vary_key(
        &self,
        base_key: &str,
        headers: &HeaderMap,
        uri: &Uri,
        rules: &CachedVaryByRules,
    ) -> String;

    fn lookup_vary_keys(
        &self,
        base_key: &str,
        headers: &HeaderMap,
        uri: &Uri,
        rules: &CachedVaryByRules,
    ) -> Vec<String> {
        vec![self.storage_vary_key(base_key, headers, uri, rules)]
    }
}

/// Default [`CacheKeyProvider`]: `"{METHOD}\n{path}"` base keys with the
/// path ASCII-uppercased unless case-sensitive paths are enabled.
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyProvider {
    use_case_sensitive_paths: bool,
}

impl DefaultKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_case_sensitive_paths(mut self, enabled: bool) -> Self {
        self.use_case_sensitive_paths = enabled;
        self
    }
}

impl CacheKeyProvider for DefaultKeyProvider {
    fn base_key(&self, method: &Method, uri: &Uri) -> String {
        let path = if self.use_case_sensitive_paths {
            uri.path().to_owned()
        } else {
            uri.path().to_ascii_uppercase()
        };
        format!("{}\n{}", method.as_str(), path)
    }

    fn storage_vary_key(
        &self,
        base_key: &str,
        headers: &HeaderMap,
        uri: &Uri,
        rules: &CachedVaryByRules,
    ) -> String {
        let mut key = String::with_capacity(base_key.len() + rules.vary_key_prefix.len() + 32);
        key.push_str(base_key);
        key.push(KEY_DELIMITER);
        key.push_str(&rules.vary_key_prefix);

        if !rules.headers.is_empty() {
            key.push(KEY_SUBDELIMITER);
            key.push('H');
            let mut names: Vec<String> =
                rules.headers.iter().map(|h| h.to_ascii_uppercase()).collect();
            names.sort_unstable();
            names.dedup();
            for name in names {
                key.push(KEY_DELIMITER);
                key.push_str(&name);
                key.push('=');
                key.push_str(&joined_header_values(headers, &name));
            }
        }

        if !rules.query_keys.is_empty() {
            key.push(KEY_SUBDELIMITER);
            key.push('Q');
            let pairs = query_pairs(uri);
            let mut selected: Vec<String> =
                if rules.query_keys.len() == 1 && rules.query_keys[0] == "*" {
                    pairs.iter().map(|(k, _)| k.to_ascii_uppercase()).collect()
                } else {
                    rules
                        .query_keys
                        .iter()
                        .map(|k| k.to_ascii_uppercase())
                        .collect()
                };
            selected.sort_unstable();
            selected.dedup();
            for query_key in selected {
                key.push(KEY_DELIMITER);
                key.push_str(&query_key);
                key.push('=');
                key.push_str(&joined_query_values(&pairs, &query_key));
            }
        }

        key
    }
}

fn joined_header_values(headers: &HeaderMap, name: &str) -> String {
    let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
        return String::new();
    };
    headers
        .get_all(&name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(VALUE_SEPARATOR)
}

/// Raw query pairs in document order; no percent-decoding is applied, which
/// keeps key derivation deterministic across processes.
fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    let Some(query) = uri.query() else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}

fn joined_query_values(pairs: &[(String, String)], key: &str) -> String {
    pairs
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
        .collect::<Vec<_>>()
        .join(VALUE_SEPARATOR)
}

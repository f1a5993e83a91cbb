use bytes::Bytes;
use chrono::DateTime;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::entry::{CachedEntry, CachedResponse, CachedVaryByRules, SegmentedBody};
use crate::error::CacheError;

/// Trait representing a serialization strategy for cached entries.
///
/// The storage collaborator only sees opaque bytes; the codec is what turns
/// a [`CachedEntry`] into the stored blob and back.
pub trait CacheCodec: Send + Sync + Clone + 'static {
    fn encode(&self, entry: &CachedEntry) -> Result<Bytes, CacheError>;
    fn decode(&self, bytes: &[u8]) -> Result<CachedEntry, CacheError>;
}

/// Default [`CacheCodec`] implementation backed by `bincode`.
#[derive(Clone, Default)]
pub struct BincodeCodec;

#[derive(Serialize, Deserialize)]
enum StoredEntry {
    Response(StoredResponse),
    VaryRules(StoredVaryRules),
}

#[derive(Serialize, Deserialize)]
struct StoredResponse {
    created: i64,
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    segments: Vec<Vec<u8>>,
    length: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredVaryRules {
    prefix: String,
    headers: Vec<String>,
    query_keys: Vec<String>,
}

impl CacheCodec for BincodeCodec {
    fn encode(&self, entry: &CachedEntry) -> Result<Bytes, CacheError> {
        let stored = match entry {
            CachedEntry::Response(response) => StoredEntry::Response(StoredResponse {
                created: response.created.timestamp(),
                status: response.status.as_u16(),
                headers: response.headers.clone(),
                segments: response
                    .body
                    .segments()
                    .iter()
                    .map(|segment| segment.to_vec())
                    .collect(),
                length: response.body.len(),
            }),
            CachedEntry::VaryRules(rules) => StoredEntry::VaryRules(StoredVaryRules {
                prefix: rules.vary_key_prefix.clone(),
                headers: rules.headers.clone(),
                query_keys: rules.query_keys.clone(),
            }),
        };

        bincode::serialize(&stored)
            .map(Bytes::from)
            .map_err(|err| CacheError::Codec(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CachedEntry, CacheError> {
        let stored: StoredEntry =
            bincode::deserialize(bytes).map_err(|err| CacheError::Codec(err.to_string()))?;

        match stored {
            StoredEntry::Response(response) => {
                let created = DateTime::from_timestamp(response.created, 0)
                    .ok_or_else(|| CacheError::Codec("timestamp out of range".into()))?;
                let status = StatusCode::from_u16(response.status)
                    .map_err(|err| CacheError::Codec(err.to_string()))?;
                let segments: Vec<Bytes> =
                    response.segments.into_iter().map(Bytes::from).collect();
                let recorded: u64 = segments.iter().map(|s| s.len() as u64).sum();
                if recorded != response.length {
                    return Err(CacheError::Codec("body length mismatch".into()));
                }
                Ok(CachedEntry::Response(CachedResponse {
                    created,
                    status,
                    headers: response.headers,
                    body: SegmentedBody::new(segments),
                }))
            }
            StoredEntry::VaryRules(rules) => Ok(CachedEntry::VaryRules(CachedVaryByRules {
                vary_key_prefix: rules.prefix,
                headers: rules.headers,
                query_keys: rules.query_keys,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn response_survives_encode_decode() {
        let codec = BincodeCodec;
        let entry = CachedEntry::Response(CachedResponse {
            created: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            status: StatusCode::OK,
            headers: vec![("content-type".to_owned(), b"text/plain".to_vec())],
            body: SegmentedBody::new(vec![
                Bytes::from_static(b"hello "),
                Bytes::from_static(b"world"),
            ]),
        });

        let decoded = codec.decode(&codec.encode(&entry).expect("encode")).expect("decode");
        match decoded {
            CachedEntry::Response(response) => {
                assert_eq!(
                    response.created,
                    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
                );
                assert_eq!(response.status, StatusCode::OK);
                assert_eq!(response.body.to_bytes(), Bytes::from_static(b"hello world"));
                assert_eq!(response.headers.len(), 1);
            }
            CachedEntry::VaryRules(_) => panic!("decoded wrong variant"),
        }
    }

    #[test]
    fn vary_rules_survive_encode_decode() {
        let codec = BincodeCodec;
        let entry = CachedEntry::VaryRules(CachedVaryByRules {
            vary_key_prefix: "abc123".to_owned(),
            headers: vec!["ACCEPT".to_owned()],
            query_keys: vec!["*".to_owned()],
        });

        let decoded = codec.decode(&codec.encode(&entry).expect("encode")).expect("decode");
        match decoded {
            CachedEntry::VaryRules(rules) => {
                assert_eq!(rules.vary_key_prefix, "abc123");
                assert_eq!(rules.headers, vec!["ACCEPT".to_owned()]);
                assert_eq!(rules.query_keys, vec!["*".to_owned()]);
            }
            CachedEntry::Response(_) => panic!("decoded wrong variant"),
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        let codec = BincodeCodec;
        assert!(codec.decode(b"\xff\xff\xff\xff").is_err());
    }
}

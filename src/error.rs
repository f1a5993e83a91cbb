use thiserror::Error;

/// Errors that can occur while reading or writing cached entries.
///
/// Storage read failures are downgraded to cache misses by the layer;
/// storage write failures are logged and the response completes normally.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("codec error: {0}")]
    Codec(String),
}

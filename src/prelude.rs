//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use tower_response_cache::prelude::*;
//! # use std::time::Duration;
//! let layer = CacheLayer::builder(InMemoryStorage::new())
//!     .default_validity(Duration::from_secs(30))
//!     .build();
//! ```

pub use crate::body::CacheBody;
pub use crate::codec::{BincodeCodec, CacheCodec};
pub use crate::entry::{CachedEntry, CachedResponse, CachedVaryByRules, SegmentedBody};
pub use crate::keys::{CacheKeyProvider, DefaultKeyProvider, VaryByQueryKeys};
pub use crate::layer::{CacheLayer, CacheLayerBuilder, CacheService};
pub use crate::policy::CachePolicy;
pub use crate::storage::memory::InMemoryStorage;
pub use crate::storage::CacheStorage;

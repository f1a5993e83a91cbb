//! Tower Response Cache
//! ====================
//!
//! `tower-response-cache` is an RFC 7234 shared-cache middleware for Tower
//! services: it decides whether an incoming request can be answered from a
//! previously stored response and, when a request flows through to the
//! upstream service, whether the resulting response may be stored and for
//! how long. Responses are captured through a size-bounded, write-through
//! segmented buffer, so streaming semantics are preserved whether or not
//! the body ends up in the cache.
//!
//! Storage is pluggable through the [`storage::CacheStorage`] trait; the
//! crate ships an in-memory backend. `Vary` headers and per-request
//! `VaryByQueryKeys` resolve one logical resource to its stored variants.
//!
//! ```no_run
//! use std::time::Duration;
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_response_cache::prelude::*;
//!
//! # async fn run() -> Result<(), tower_response_cache::layer::BoxError> {
//! let layer = CacheLayer::builder(InMemoryStorage::new())
//!     .default_validity(Duration::from_secs(30))
//!     .maximum_body_size(1024 * 1024)
//!     .build();
//!
//! let mut svc = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(tower::service_fn(|_req| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::from("ok")))
//!     }));
//!
//! let response = svc
//!     .ready()
//!     .await?
//!     .call(http::Request::new(()))
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod capture;
pub mod codec;
pub mod context;
pub mod entry;
pub mod error;
pub mod events;
pub mod headers;
pub mod keys;
pub mod layer;
pub mod policy;
pub mod prelude;
pub mod storage;

pub use error::CacheError;
pub use events::Diagnostic;
pub use keys::VaryByQueryKeys;
pub use layer::{CacheLayer, CacheLayerBuilder, CacheService};
pub use policy::CachePolicy;

//! Structured diagnostic events describing cache decisions.
//!
//! Every decision point in the caching flow emits exactly one tag from the
//! fixed set below as a `tracing` debug event under the
//! `tower_response_cache::events` target. The set is part of the crate's
//! observable surface: integration tests and operators key off these names.

use std::fmt;

pub(crate) const EVENT_TARGET: &str = "tower_response_cache::events";

/// Diagnostic tag emitted for a single cache decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// The request method is not GET or HEAD.
    RequestMethodNotCacheable,
    /// The request carries a non-empty `Authorization` header.
    RequestWithAuthorizationNotCacheable,
    /// The request `Cache-Control` contains `no-cache`.
    RequestWithNoCacheNotCacheable,
    /// No request `Cache-Control`, but `Pragma` contains `no-cache`.
    RequestWithPragmaNoCacheNotCacheable,
    /// The response `Cache-Control` lacks `public`.
    ResponseWithoutPublicNotCacheable,
    /// Request or response `Cache-Control` contains `no-store`.
    ResponseWithNoStoreNotCacheable,
    /// The response `Cache-Control` contains `no-cache`.
    ResponseWithNoCacheNotCacheable,
    /// The response sets a cookie.
    ResponseWithSetCookieNotCacheable,
    /// The response `Vary` header is `*`.
    ResponseWithVaryStarNotCacheable,
    /// The response `Cache-Control` contains `private`.
    ResponseWithPrivateNotCacheable,
    /// The response status is not 200.
    ResponseWithUnsuccessfulStatusCodeNotCacheable,
    /// `Expires` has already passed.
    ExpirationExpiresExceeded,
    /// The entry age reached `s-maxage`.
    ExpirationSharedMaxAgeExceeded,
    /// The entry age reached the lowest applicable `max-age`.
    ExpirationMaxAgeExceeded,
    /// A stale entry cannot be served because of `must-revalidate`.
    ExpirationMustRevalidate,
    /// `min-fresh` inflated the measured entry age.
    ExpirationMinFreshAdded,
    /// `only-if-cached` with no usable entry; 504 served.
    GatewayTimeoutServed,
    /// Nothing servable in the cache; forwarding to the upstream handler.
    NoResponseServed,
    /// A cached response was replayed to the client.
    CachedResponseServed,
    /// A conditional request short-circuited to 304.
    NotModifiedServed,
    /// `If-None-Match: *` matched.
    NotModifiedIfNoneMatchStar,
    /// An `If-None-Match` tag matched the cached `ETag`.
    NotModifiedIfNoneMatchMatched,
    /// `If-Unmodified-Since` was satisfied by the cached resource time.
    NotModifiedIfUnmodifiedSinceSatisfied,
    /// Vary rules were written under the base key.
    VaryByRulesUpdated,
    /// The captured response body was committed to storage.
    ResponseCached,
    /// The response was not stored.
    ResponseNotCached,
    /// The declared `Content-Length` did not match the captured body.
    ResponseContentLengthMismatchNotCached,
}

impl Diagnostic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Diagnostic::RequestMethodNotCacheable => "RequestMethodNotCacheable",
            Diagnostic::RequestWithAuthorizationNotCacheable => {
                "RequestWithAuthorizationNotCacheable"
            }
            Diagnostic::RequestWithNoCacheNotCacheable => "RequestWithNoCacheNotCacheable",
            Diagnostic::RequestWithPragmaNoCacheNotCacheable => {
                "RequestWithPragmaNoCacheNotCacheable"
            }
            Diagnostic::ResponseWithoutPublicNotCacheable => "ResponseWithoutPublicNotCacheable",
            Diagnostic::ResponseWithNoStoreNotCacheable => "ResponseWithNoStoreNotCacheable",
            Diagnostic::ResponseWithNoCacheNotCacheable => "ResponseWithNoCacheNotCacheable",
            Diagnostic::ResponseWithSetCookieNotCacheable => "ResponseWithSetCookieNotCacheable",
            Diagnostic::ResponseWithVaryStarNotCacheable => "ResponseWithVaryStarNotCacheable",
            Diagnostic::ResponseWithPrivateNotCacheable => "ResponseWithPrivateNotCacheable",
            Diagnostic::ResponseWithUnsuccessfulStatusCodeNotCacheable => {
                "ResponseWithUnsuccessfulStatusCodeNotCacheable"
            }
            Diagnostic::ExpirationExpiresExceeded => "ExpirationExpiresExceeded",
            Diagnostic::ExpirationSharedMaxAgeExceeded => "ExpirationSharedMaxAgeExceeded",
            Diagnostic::ExpirationMaxAgeExceeded => "ExpirationMaxAgeExceeded",
            Diagnostic::ExpirationMustRevalidate => "ExpirationMustRevalidate",
            Diagnostic::ExpirationMinFreshAdded => "ExpirationMinFreshAdded",
            Diagnostic::GatewayTimeoutServed => "GatewayTimeoutServed",
            Diagnostic::NoResponseServed => "NoResponseServed",
            Diagnostic::CachedResponseServed => "CachedResponseServed",
            Diagnostic::NotModifiedServed => "NotModifiedServed",
            Diagnostic::NotModifiedIfNoneMatchStar => "NotModifiedIfNoneMatchStar",
            Diagnostic::NotModifiedIfNoneMatchMatched => "NotModifiedIfNoneMatchMatched",
            Diagnostic::NotModifiedIfUnmodifiedSinceSatisfied => {
                "NotModifiedIfUnmodifiedSinceSatisfied"
            }
            Diagnostic::VaryByRulesUpdated => "VaryByRulesUpdated",
            Diagnostic::ResponseCached => "ResponseCached",
            Diagnostic::ResponseNotCached => "ResponseNotCached",
            Diagnostic::ResponseContentLengthMismatchNotCached => {
                "ResponseContentLengthMismatchNotCached"
            }
        }
    }

    /// Emits the tag as a structured tracing event.
    pub fn emit(&self) {
        tracing::debug!(target: EVENT_TARGET, event = self.as_str());
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

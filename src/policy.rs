//! RFC 7234 cacheability and freshness policy.
//!
//! Three predicates drive the caching flow: request eligibility, response
//! storability, and freshness of an already-cached entry. Each returns the
//! diagnostic tag naming the first failed rule; the layer emits it. The
//! predicates are shared-cache semantics: `s-maxage` strictly overrides
//! `max-age`, and `private` responses are never stored.

use chrono::{DateTime, Utc};
use http::{header, HeaderMap, Method, StatusCode};
use std::time::Duration;

use crate::context::RequestContext;
use crate::events::Diagnostic;
use crate::headers;

pub(crate) const DEFAULT_VALIDITY: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_MAXIMUM_BODY_SIZE: u64 = 64 * 1024 * 1024;

/// Cache policy configuration shared by the layer and the capture stream.
///
/// Cheap to clone and immutable; the `with_*` helpers return updated copies.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    default_validity: Duration,
    maximum_body_size: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            default_validity: DEFAULT_VALIDITY,
            maximum_body_size: DEFAULT_MAXIMUM_BODY_SIZE,
        }
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validity applied when the response carries no freshness directives.
    pub fn with_default_validity(mut self, validity: Duration) -> Self {
        self.default_validity = validity;
        self
    }

    /// Per-response cap on the number of body bytes buffered for storage.
    pub fn with_maximum_body_size(mut self, bytes: u64) -> Self {
        self.maximum_body_size = bytes;
        self
    }

    pub fn default_validity(&self) -> Duration {
        self.default_validity
    }

    pub fn maximum_body_size(&self) -> u64 {
        self.maximum_body_size
    }

    /// Whether the request may be answered from or stored into the cache.
    pub fn is_request_cacheable(&self, ctx: &RequestContext) -> Result<(), Diagnostic> {
        if ctx.method != Method::GET && ctx.method != Method::HEAD {
            return Err(Diagnostic::RequestMethodNotCacheable);
        }

        if let Some(authorization) = ctx.request_headers.get(header::AUTHORIZATION) {
            if !authorization.is_empty() {
                return Err(Diagnostic::RequestWithAuthorizationNotCacheable);
            }
        }

        if ctx.request_headers.contains_key(header::CACHE_CONTROL) {
            if headers::contains(
                headers::string_values(&ctx.request_headers, &header::CACHE_CONTROL),
                "no-cache",
            ) {
                return Err(Diagnostic::RequestWithNoCacheNotCacheable);
            }
        } else if headers::contains(
            headers::string_values(&ctx.request_headers, &header::PRAGMA),
            "no-cache",
        ) {
            return Err(Diagnostic::RequestWithPragmaNoCacheNotCacheable);
        }

        Ok(())
    }

    /// Whether the upstream response may be stored.
    ///
    /// Also records the parsed `Date`/`Expires`/`max-age`/`s-maxage`
    /// material on the context for the validity computation that follows.
    pub fn is_response_cacheable(
        &self,
        ctx: &mut RequestContext,
        status: StatusCode,
        response_headers: &HeaderMap,
    ) -> Result<(), Diagnostic> {
        let response_cache_control: Vec<&str> =
            headers::string_values(response_headers, &header::CACHE_CONTROL).collect();
        let request_cache_control: Vec<&str> =
            headers::string_values(&ctx.request_headers, &header::CACHE_CONTROL).collect();

        if !headers::contains(response_cache_control.iter().copied(), "public") {
            return Err(Diagnostic::ResponseWithoutPublicNotCacheable);
        }
        if headers::contains(request_cache_control.iter().copied(), "no-store")
            || headers::contains(response_cache_control.iter().copied(), "no-store")
        {
            return Err(Diagnostic::ResponseWithNoStoreNotCacheable);
        }
        if headers::contains(response_cache_control.iter().copied(), "no-cache") {
            return Err(Diagnostic::ResponseWithNoCacheNotCacheable);
        }
        if response_headers.contains_key(header::SET_COOKIE) {
            return Err(Diagnostic::ResponseWithSetCookieNotCacheable);
        }

        let vary_values: Vec<&str> =
            headers::string_values(response_headers, &header::VARY).collect();
        if vary_values.len() == 1 && vary_values[0].trim() == "*" {
            return Err(Diagnostic::ResponseWithVaryStarNotCacheable);
        }

        if headers::contains(response_cache_control.iter().copied(), "private") {
            return Err(Diagnostic::ResponseWithPrivateNotCacheable);
        }
        if status != StatusCode::OK {
            return Err(Diagnostic::ResponseWithUnsuccessfulStatusCodeNotCacheable);
        }

        ctx.response_date = response_headers
            .get(header::DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(headers::try_parse_date);
        ctx.response_expires = response_headers
            .get(header::EXPIRES)
            .and_then(|value| value.to_str().ok())
            .and_then(headers::try_parse_date);
        ctx.response_shared_max_age =
            headers::try_parse_seconds(response_cache_control.iter().copied(), "s-maxage");
        ctx.response_max_age =
            headers::try_parse_seconds(response_cache_control.iter().copied(), "max-age");

        match ctx.response_date {
            None => {
                if ctx.response_shared_max_age.is_none() && ctx.response_max_age.is_none() {
                    if let Some(expires) = ctx.response_expires {
                        if ctx.response_time >= expires {
                            return Err(Diagnostic::ExpirationExpiresExceeded);
                        }
                    }
                }
            }
            Some(date) => {
                let age = age_between(date, ctx.response_time);
                if let Some(shared_max_age) = ctx.response_shared_max_age {
                    if age >= shared_max_age {
                        return Err(Diagnostic::ExpirationSharedMaxAgeExceeded);
                    }
                } else if let Some(max_age) = ctx.response_max_age {
                    if age >= max_age {
                        return Err(Diagnostic::ExpirationMaxAgeExceeded);
                    }
                } else if let Some(expires) = ctx.response_expires {
                    if ctx.response_time >= expires {
                        return Err(Diagnostic::ExpirationExpiresExceeded);
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether the cached entry on the context is still fresh for this
    /// request.
    pub fn is_cached_entry_fresh(&self, ctx: &RequestContext) -> Result<(), Diagnostic> {
        let empty = HeaderMap::new();
        let cached_headers = ctx.cached_response_headers.as_ref().unwrap_or(&empty);
        let cached_cache_control: Vec<&str> =
            headers::string_values(cached_headers, &header::CACHE_CONTROL).collect();
        let request_cache_control: Vec<&str> =
            headers::string_values(&ctx.request_headers, &header::CACHE_CONTROL).collect();

        let mut age = ctx.cached_entry_age.unwrap_or_default();
        if let Some(min_fresh) =
            headers::try_parse_seconds(request_cache_control.iter().copied(), "min-fresh")
        {
            age += min_fresh;
            Diagnostic::ExpirationMinFreshAdded.emit();
        }

        let cached_shared_max_age =
            headers::try_parse_seconds(cached_cache_control.iter().copied(), "s-maxage");
        if let Some(shared_max_age) = cached_shared_max_age {
            // s-maxage carries implicit must-revalidate semantics.
            if age >= shared_max_age {
                return Err(Diagnostic::ExpirationSharedMaxAgeExceeded);
            }
            return Ok(());
        }

        let cached_max_age =
            headers::try_parse_seconds(cached_cache_control.iter().copied(), "max-age");
        let request_max_age =
            headers::try_parse_seconds(request_cache_control.iter().copied(), "max-age");
        let lowest_max_age = match (cached_max_age, request_max_age) {
            (Some(cached), Some(requested)) => Some(cached.min(requested)),
            (cached, requested) => cached.or(requested),
        };

        match lowest_max_age {
            Some(lowest) if age >= lowest => {
                if headers::contains(cached_cache_control.iter().copied(), "must-revalidate") {
                    return Err(Diagnostic::ExpirationMustRevalidate);
                }
                if let Some(max_stale) =
                    headers::try_parse_seconds(request_cache_control.iter().copied(), "max-stale")
                {
                    if age - lowest < max_stale {
                        return Ok(());
                    }
                }
                Err(Diagnostic::ExpirationMaxAgeExceeded)
            }
            Some(_) => Ok(()),
            None => {
                let expires = cached_headers
                    .get(header::EXPIRES)
                    .and_then(|value| value.to_str().ok())
                    .and_then(headers::try_parse_date);
                if let Some(expires) = expires {
                    if ctx.response_time >= expires {
                        return Err(Diagnostic::ExpirationExpiresExceeded);
                    }
                }
                Ok(())
            }
        }
    }
}

/// Elapsed wall-clock from `from` to `to`, clamped at zero.
fn age_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    to.signed_duration_since(from).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use http::{HeaderValue, Uri};

    fn context() -> RequestContext {
        RequestContext::new(Method::GET, Uri::from_static("/"), HeaderMap::new())
    }

    fn context_with_request_header(name: header::HeaderName, value: &'static str) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        RequestContext::new(Method::GET, Uri::from_static("/"), headers)
    }

    fn response_headers(cache_control: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
        headers
    }

    mod request_cacheable {
        use super::*;

        #[test]
        fn accepts_get_and_head() {
            let policy = CachePolicy::new();
            assert!(policy.is_request_cacheable(&context()).is_ok());

            let ctx = RequestContext::new(Method::HEAD, Uri::from_static("/"), HeaderMap::new());
            assert!(policy.is_request_cacheable(&ctx).is_ok());
        }

        #[test]
        fn rejects_other_methods() {
            let ctx = RequestContext::new(Method::POST, Uri::from_static("/"), HeaderMap::new());
            assert_eq!(
                CachePolicy::new().is_request_cacheable(&ctx),
                Err(Diagnostic::RequestMethodNotCacheable)
            );
        }

        #[test]
        fn rejects_authorization() {
            let ctx = context_with_request_header(header::AUTHORIZATION, "Bearer token");
            assert_eq!(
                CachePolicy::new().is_request_cacheable(&ctx),
                Err(Diagnostic::RequestWithAuthorizationNotCacheable)
            );
        }

        #[test]
        fn rejects_request_no_cache() {
            let ctx = context_with_request_header(header::CACHE_CONTROL, "no-cache");
            assert_eq!(
                CachePolicy::new().is_request_cacheable(&ctx),
                Err(Diagnostic::RequestWithNoCacheNotCacheable)
            );
        }

        #[test]
        fn pragma_applies_only_without_cache_control() {
            let ctx = context_with_request_header(header::PRAGMA, "no-cache");
            assert_eq!(
                CachePolicy::new().is_request_cacheable(&ctx),
                Err(Diagnostic::RequestWithPragmaNoCacheNotCacheable)
            );

            let mut headers = HeaderMap::new();
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            let ctx = RequestContext::new(Method::GET, Uri::from_static("/"), headers);
            assert!(CachePolicy::new().is_request_cacheable(&ctx).is_ok());
        }
    }

    mod response_cacheable {
        use super::*;

        #[test]
        fn requires_public() {
            let mut ctx = context();
            assert_eq!(
                CachePolicy::new().is_response_cacheable(
                    &mut ctx,
                    StatusCode::OK,
                    &response_headers("max-age=60"),
                ),
                Err(Diagnostic::ResponseWithoutPublicNotCacheable)
            );
        }

        #[test]
        fn accepts_public_without_freshness_directives() {
            let mut ctx = context();
            assert!(CachePolicy::new()
                .is_response_cacheable(&mut ctx, StatusCode::OK, &response_headers("public"))
                .is_ok());
        }

        #[test]
        fn rejects_no_store_on_either_side() {
            let mut ctx = context();
            assert_eq!(
                CachePolicy::new().is_response_cacheable(
                    &mut ctx,
                    StatusCode::OK,
                    &response_headers("public, no-store"),
                ),
                Err(Diagnostic::ResponseWithNoStoreNotCacheable)
            );

            let mut ctx = context_with_request_header(header::CACHE_CONTROL, "no-store");
            assert_eq!(
                CachePolicy::new().is_response_cacheable(
                    &mut ctx,
                    StatusCode::OK,
                    &response_headers("public"),
                ),
                Err(Diagnostic::ResponseWithNoStoreNotCacheable)
            );
        }

        #[test]
        fn rejects_no_cache_private_and_set_cookie() {
            let policy = CachePolicy::new();

            let mut ctx = context();
            assert_eq!(
                policy.is_response_cacheable(
                    &mut ctx,
                    StatusCode::OK,
                    &response_headers("public, no-cache"),
                ),
                Err(Diagnostic::ResponseWithNoCacheNotCacheable)
            );

            let mut ctx = context();
            assert_eq!(
                policy.is_response_cacheable(
                    &mut ctx,
                    StatusCode::OK,
                    &response_headers("public, private"),
                ),
                Err(Diagnostic::ResponseWithPrivateNotCacheable)
            );

            let mut ctx = context();
            let mut headers = response_headers("public");
            headers.insert(header::SET_COOKIE, HeaderValue::from_static("session=1"));
            assert_eq!(
                policy.is_response_cacheable(&mut ctx, StatusCode::OK, &headers),
                Err(Diagnostic::ResponseWithSetCookieNotCacheable)
            );
        }

        #[test]
        fn rejects_vary_star() {
            let mut ctx = context();
            let mut headers = response_headers("public");
            headers.insert(header::VARY, HeaderValue::from_static("*"));
            assert_eq!(
                CachePolicy::new().is_response_cacheable(&mut ctx, StatusCode::OK, &headers),
                Err(Diagnostic::ResponseWithVaryStarNotCacheable)
            );

            let mut ctx = context();
            let mut headers = response_headers("public");
            headers.insert(header::VARY, HeaderValue::from_static("accept"));
            assert!(CachePolicy::new()
                .is_response_cacheable(&mut ctx, StatusCode::OK, &headers)
                .is_ok());
        }

        #[test]
        fn rejects_non_ok_status() {
            let mut ctx = context();
            assert_eq!(
                CachePolicy::new().is_response_cacheable(
                    &mut ctx,
                    StatusCode::NOT_FOUND,
                    &response_headers("public"),
                ),
                Err(Diagnostic::ResponseWithUnsuccessfulStatusCodeNotCacheable)
            );
        }

        #[test]
        fn rejects_already_expired_response_by_age() {
            let mut ctx = context();
            let mut headers = response_headers("public, max-age=60");
            let date = ctx.response_time - TimeDelta::seconds(120);
            headers.insert(
                header::DATE,
                HeaderValue::from_str(&headers::format_date(date)).unwrap(),
            );
            assert_eq!(
                CachePolicy::new().is_response_cacheable(&mut ctx, StatusCode::OK, &headers),
                Err(Diagnostic::ExpirationMaxAgeExceeded)
            );
        }

        #[test]
        fn shared_max_age_overrides_max_age() {
            let mut ctx = context();
            let mut headers = response_headers("public, max-age=60, s-maxage=300");
            let date = ctx.response_time - TimeDelta::seconds(120);
            headers.insert(
                header::DATE,
                HeaderValue::from_str(&headers::format_date(date)).unwrap(),
            );
            // max-age alone would reject, but s-maxage still covers the age.
            assert!(CachePolicy::new()
                .is_response_cacheable(&mut ctx, StatusCode::OK, &headers)
                .is_ok());
            assert_eq!(ctx.response_shared_max_age, Some(Duration::from_secs(300)));
        }

        #[test]
        fn expired_expires_without_directives_rejects() {
            let mut ctx = context();
            let mut headers = response_headers("public");
            let past = ctx.response_time - TimeDelta::seconds(30);
            headers.insert(
                header::EXPIRES,
                HeaderValue::from_str(&headers::format_date(past)).unwrap(),
            );
            assert_eq!(
                CachePolicy::new().is_response_cacheable(&mut ctx, StatusCode::OK, &headers),
                Err(Diagnostic::ExpirationExpiresExceeded)
            );
        }
    }

    mod entry_fresh {
        use super::*;

        fn fresh_context(
            cached_cache_control: &str,
            age_secs: u64,
            request_cache_control: Option<&str>,
        ) -> RequestContext {
            let mut request_headers = HeaderMap::new();
            if let Some(value) = request_cache_control {
                request_headers
                    .insert(header::CACHE_CONTROL, HeaderValue::from_str(value).unwrap());
            }
            let mut ctx =
                RequestContext::new(Method::GET, Uri::from_static("/"), request_headers);
            let mut cached = HeaderMap::new();
            cached.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_str(cached_cache_control).unwrap(),
            );
            ctx.cached_response_headers = Some(cached);
            ctx.cached_entry_age = Some(Duration::from_secs(age_secs));
            ctx
        }

        #[test]
        fn fresh_within_max_age() {
            let ctx = fresh_context("public, max-age=60", 30, None);
            assert!(CachePolicy::new().is_cached_entry_fresh(&ctx).is_ok());
        }

        #[test]
        fn stale_at_shared_max_age() {
            let ctx = fresh_context("public, s-maxage=30, max-age=600", 30, None);
            assert_eq!(
                CachePolicy::new().is_cached_entry_fresh(&ctx),
                Err(Diagnostic::ExpirationSharedMaxAgeExceeded)
            );
        }

        #[test]
        fn request_max_age_lowers_the_bound() {
            let ctx = fresh_context("public, max-age=600", 30, Some("max-age=10"));
            assert_eq!(
                CachePolicy::new().is_cached_entry_fresh(&ctx),
                Err(Diagnostic::ExpirationMaxAgeExceeded)
            );
        }

        #[test]
        fn min_fresh_inflates_age() {
            let ctx = fresh_context("public, max-age=60", 30, Some("min-fresh=40"));
            assert_eq!(
                CachePolicy::new().is_cached_entry_fresh(&ctx),
                Err(Diagnostic::ExpirationMaxAgeExceeded)
            );
        }

        #[test]
        fn max_stale_tolerates_staleness() {
            let ctx = fresh_context("public, max-age=10", 15, Some("max-stale=30"));
            assert!(CachePolicy::new().is_cached_entry_fresh(&ctx).is_ok());

            let ctx = fresh_context("public, max-age=10", 50, Some("max-stale=30"));
            assert_eq!(
                CachePolicy::new().is_cached_entry_fresh(&ctx),
                Err(Diagnostic::ExpirationMaxAgeExceeded)
            );
        }

        #[test]
        fn must_revalidate_beats_max_stale() {
            let ctx = fresh_context("public, max-age=10, must-revalidate", 15, Some("max-stale=30"));
            assert_eq!(
                CachePolicy::new().is_cached_entry_fresh(&ctx),
                Err(Diagnostic::ExpirationMustRevalidate)
            );
        }

        #[test]
        fn expires_fallback_when_no_max_age_anywhere() {
            let mut ctx = fresh_context("public", 0, None);
            let past = ctx.response_time - TimeDelta::seconds(5);
            ctx.cached_response_headers.as_mut().unwrap().insert(
                header::EXPIRES,
                HeaderValue::from_str(&headers::format_date(past)).unwrap(),
            );
            assert_eq!(
                CachePolicy::new().is_cached_entry_fresh(&ctx),
                Err(Diagnostic::ExpirationExpiresExceeded)
            );

            let mut ctx = fresh_context("public", 0, None);
            let future = ctx.response_time + TimeDelta::seconds(300);
            ctx.cached_response_headers.as_mut().unwrap().insert(
                header::EXPIRES,
                HeaderValue::from_str(&headers::format_date(future)).unwrap(),
            );
            assert!(CachePolicy::new().is_cached_entry_fresh(&ctx).is_ok());
        }

        #[test]
        fn fresh_with_no_freshness_information_at_all() {
            let ctx = fresh_context("public", 1000, None);
            assert!(CachePolicy::new().is_cached_entry_fresh(&ctx).is_ok());
        }
    }
}

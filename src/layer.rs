use std::error::Error as StdError;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::BoxFuture;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use tower::{Layer, Service, ServiceExt};
use tracing::Instrument;
use uuid::Uuid;

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::body::CacheBody;
use crate::capture::CaptureBody;
use crate::codec::{BincodeCodec, CacheCodec};
use crate::context::RequestContext;
use crate::entry::{CachedEntry, CachedResponse, CachedVaryByRules, SegmentedBody};
use crate::events::Diagnostic;
use crate::headers;
use crate::keys::{CacheKeyProvider, DefaultKeyProvider, VaryByQueryKeys};
use crate::policy::CachePolicy;
use crate::storage::CacheStorage;

pub type BoxError = Box<dyn StdError + Send + Sync>;

const TRACE_TARGET: &str = "tower_response_cache";

/// Headers a 304 response carries over from the cached entry.
const NOT_MODIFIED_HEADERS: [HeaderName; 6] = [
    header::CACHE_CONTROL,
    header::CONTENT_LOCATION,
    header::DATE,
    header::ETAG,
    header::EXPIRES,
    header::VARY,
];

/// RFC 7234 response-caching layer for Tower services.
///
/// The layer wraps an inner service and serves eligible requests from a
/// pluggable [`CacheStorage`] backend, capturing storable upstream
/// responses on the way out. Create instances via [`CacheLayer::builder`],
/// or [`CacheLayer::new`] for the default policy.
///
/// Cloning a `CacheLayer` is cheap and shares the underlying storage.
#[derive(Clone)]
pub struct CacheLayer<S, K = DefaultKeyProvider, C = BincodeCodec> {
    storage: S,
    policy: CachePolicy,
    keys: K,
    codec: C,
}

impl<S> CacheLayer<S>
where
    S: CacheStorage,
{
    /// Builds a cache layer with the default [`CachePolicy`].
    pub fn new(storage: S) -> Self {
        CacheLayerBuilder::new(storage).build()
    }

    /// Returns a builder for fine-grained control over the cache policy.
    pub fn builder(storage: S) -> CacheLayerBuilder<S> {
        CacheLayerBuilder::new(storage)
    }
}

/// Builder for configuring [`CacheLayer`] instances.
pub struct CacheLayerBuilder<S, K = DefaultKeyProvider, C = BincodeCodec> {
    storage: S,
    policy: CachePolicy,
    keys: K,
    codec: C,
}

impl<S> CacheLayerBuilder<S>
where
    S: CacheStorage,
{
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            policy: CachePolicy::default(),
            keys: DefaultKeyProvider::new(),
            codec: BincodeCodec,
        }
    }
}

impl<S, K, C> CacheLayerBuilder<S, K, C>
where
    S: CacheStorage,
    K: CacheKeyProvider,
    C: CacheCodec,
{
    /// Replaces the cache policy with a pre-built value.
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validity applied when the response carries no freshness directives.
    pub fn default_validity(mut self, validity: std::time::Duration) -> Self {
        self.policy = self.policy.with_default_validity(validity);
        self
    }

    /// Per-response cap on the number of body bytes buffered for storage.
    pub fn maximum_body_size(mut self, bytes: u64) -> Self {
        self.policy = self.policy.with_maximum_body_size(bytes);
        self
    }

    /// Swaps in a custom key derivation strategy.
    pub fn key_provider<K2>(self, keys: K2) -> CacheLayerBuilder<S, K2, C>
    where
        K2: CacheKeyProvider,
    {
        CacheLayerBuilder {
            storage: self.storage,
            policy: self.policy,
            keys,
            codec: self.codec,
        }
    }

    /// Swaps in a custom entry codec.
    pub fn codec<C2>(self, codec: C2) -> CacheLayerBuilder<S, K, C2>
    where
        C2: CacheCodec,
    {
        CacheLayerBuilder {
            storage: self.storage,
            policy: self.policy,
            keys: self.keys,
            codec,
        }
    }

    pub fn build(self) -> CacheLayer<S, K, C> {
        CacheLayer {
            storage: self.storage,
            policy: self.policy,
            keys: self.keys,
            codec: self.codec,
        }
    }
}

impl<S, C> CacheLayerBuilder<S, DefaultKeyProvider, C>
where
    S: CacheStorage,
    C: CacheCodec,
{
    /// Keys paths verbatim instead of ASCII-uppercasing them.
    pub fn use_case_sensitive_paths(mut self, enabled: bool) -> Self {
        self.keys = DefaultKeyProvider::new().with_case_sensitive_paths(enabled);
        self
    }
}

impl<Svc, S, K, C> Layer<Svc> for CacheLayer<S, K, C>
where
    S: CacheStorage,
    K: CacheKeyProvider,
    C: CacheCodec,
{
    type Service = CacheService<Svc, S, K, C>;

    fn layer(&self, inner: Svc) -> Self::Service {
        CacheService {
            inner,
            storage: self.storage.clone(),
            policy: self.policy.clone(),
            keys: self.keys.clone(),
            codec: self.codec.clone(),
        }
    }
}

/// The middleware service produced by [`CacheLayer`].
#[derive(Clone)]
pub struct CacheService<Svc, S, K = DefaultKeyProvider, C = BincodeCodec> {
    inner: Svc,
    storage: S,
    policy: CachePolicy,
    keys: K,
    codec: C,
}

impl<Svc, S, K, C, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<Svc, S, K, C>
where
    Svc: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + Sync + 'static,
    ResBody::Error: Into<BoxError>,
    S: CacheStorage,
    K: CacheKeyProvider,
    C: CacheCodec,
{
    type Response = Response<CacheBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let inner = self.inner.clone();
        let storage = self.storage.clone();
        let policy = self.policy.clone();
        let keys = self.keys.clone();
        let codec = self.codec.clone();

        let span = tracing::debug_span!(
            target: TRACE_TARGET,
            "cache_request",
            request_id = %correlation_id(&req),
        );

        Box::pin(handle(inner, storage, policy, keys, codec, req).instrument(span))
    }
}

async fn handle<Svc, S, K, C, ReqBody, ResBody>(
    inner: Svc,
    storage: S,
    policy: CachePolicy,
    keys: K,
    codec: C,
    req: Request<ReqBody>,
) -> Result<Response<CacheBody>, BoxError>
where
    Svc: Service<Request<ReqBody>, Response = Response<ResBody>>,
    Svc::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + Sync + 'static,
    ResBody::Error: Into<BoxError>,
    S: CacheStorage,
    K: CacheKeyProvider,
    C: CacheCodec,
{
    let mut ctx = RequestContext::new(
        req.method().clone(),
        req.uri().clone(),
        req.headers().clone(),
    );
    if let Some(vary_query_keys) = req.extensions().get::<VaryByQueryKeys>() {
        ctx.vary_query_keys = vary_query_keys.0.clone();
    }

    if let Err(reason) = policy.is_request_cacheable(&ctx) {
        reason.emit();
        let response = inner.oneshot(req).await.map_err(Into::into)?;
        return Ok(response.map(|body| CacheBody::passthrough(body.map_err(Into::into).boxed())));
    }

    ctx.base_key = keys.base_key(&ctx.method, &ctx.uri);

    if let Some(response) = try_serve_from_cache(&mut ctx, &policy, &storage, &codec, &keys).await {
        return Ok(response);
    }

    if headers::contains(
        headers::string_values(&ctx.request_headers, &header::CACHE_CONTROL),
        "only-if-cached",
    ) {
        Diagnostic::GatewayTimeoutServed.emit();
        let mut response = Response::new(CacheBody::empty());
        *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
        return Ok(response);
    }

    Diagnostic::NoResponseServed.emit();
    #[cfg(feature = "metrics")]
    counter!("tower_response_cache.miss").increment(1);

    let response = inner.oneshot(req).await.map_err(Into::into)?;
    let (mut parts, body) = response.into_parts();

    finalize_headers(&mut ctx, &policy, &storage, &codec, &keys, parts.status, &mut parts.headers)
        .await;

    let boxed = body.map_err(Into::into).boxed();
    if !ctx.should_cache_response {
        Diagnostic::ResponseNotCached.emit();
        return Ok(Response::from_parts(parts, CacheBody::passthrough(boxed)));
    }

    ctx.mark_capture_installed();
    let capture = CaptureBody::new(
        boxed,
        policy.maximum_body_size(),
        declared_content_length(&parts.headers),
        commit_action(&ctx, &storage, &codec, &parts.headers, parts.status),
    );
    Ok(Response::from_parts(parts, CacheBody::capture(capture)))
}

/// Attempts to resolve and replay a stored response; `None` means the
/// request must be forwarded.
async fn try_serve_from_cache<S, C, K>(
    ctx: &mut RequestContext,
    policy: &CachePolicy,
    storage: &S,
    codec: &C,
    keys: &K,
) -> Option<Response<CacheBody>>
where
    S: CacheStorage,
    C: CacheCodec,
    K: CacheKeyProvider,
{
    let mut found = None;
    match lookup(storage, codec, &ctx.base_key).await {
        Some(CachedEntry::Response(response)) => found = Some(response),
        Some(CachedEntry::VaryRules(rules)) => {
            for key in keys.lookup_vary_keys(&ctx.base_key, &ctx.request_headers, &ctx.uri, &rules)
            {
                if let Some(CachedEntry::Response(response)) = lookup(storage, codec, &key).await {
                    found = Some(response);
                    break;
                }
            }
            ctx.cached_vary_rules = Some(rules);
        }
        None => {}
    }

    let cached = found?;
    let age = ctx
        .response_time
        .signed_duration_since(cached.created)
        .to_std()
        .unwrap_or_default();
    ctx.cached_entry_age = Some(std::time::Duration::from_secs(age.as_secs()));
    ctx.cached_response_headers = Some(cached.header_map());
    ctx.cached_response = Some(cached);

    if let Err(reason) = policy.is_cached_entry_fresh(ctx) {
        reason.emit();
        return None;
    }

    let cached = ctx.cached_response.take()?;
    let cached_headers = ctx.cached_response_headers.take()?;

    if let Some(reason) = content_is_not_modified(&ctx.request_headers, &cached_headers) {
        reason.emit();
        Diagnostic::NotModifiedServed.emit();
        let mut response = Response::new(CacheBody::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        for name in NOT_MODIFIED_HEADERS {
            for value in cached_headers.get_all(&name) {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        return Some(response);
    }

    Diagnostic::CachedResponseServed.emit();
    #[cfg(feature = "metrics")]
    counter!("tower_response_cache.hit").increment(1);

    let age_seconds = ctx.cached_entry_age.unwrap_or_default().as_secs();
    let mut response = Response::new(CacheBody::replay(cached.body.clone()));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached_headers;
    response
        .headers_mut()
        .insert(header::AGE, HeaderValue::from(age_seconds));
    Some(response)
}

/// Runs once per forwarded response, before any body byte leaves the
/// process: stamps `Date`, decides storability, computes validity, and
/// refreshes the Vary rules under the base key.
async fn finalize_headers<S, C, K>(
    ctx: &mut RequestContext,
    policy: &CachePolicy,
    storage: &S,
    codec: &C,
    keys: &K,
    status: StatusCode,
    response_headers: &mut HeaderMap,
) where
    S: CacheStorage,
    C: CacheCodec,
    K: CacheKeyProvider,
{
    // Runs at most once, before the first body byte is released.
    if ctx.response_started {
        return;
    }
    ctx.response_started = true;
    ctx.response_time = Utc::now();

    let cacheable = policy.is_response_cacheable(ctx, status, response_headers);

    if !response_headers.contains_key(header::DATE) {
        if let Ok(value) = HeaderValue::from_str(&headers::format_date(ctx.response_time)) {
            response_headers.insert(header::DATE, value);
        }
    }

    if let Err(reason) = cacheable {
        reason.emit();
        ctx.should_cache_response = false;
        return;
    }
    ctx.should_cache_response = true;

    let valid_for = ctx
        .response_shared_max_age
        .or(ctx.response_max_age)
        .or_else(|| {
            ctx.response_expires.map(|expires| {
                expires
                    .signed_duration_since(ctx.response_time)
                    .to_std()
                    .unwrap_or_default()
            })
        })
        .unwrap_or_else(|| policy.default_validity());
    ctx.cached_response_valid_for = Some(valid_for);

    let vary_values = headers::split_comma_separated(headers::string_values(
        response_headers,
        &header::VARY,
    ));
    let normalized_vary_headers = headers::normalize_string_values(&vary_values);
    let normalized_query_keys = headers::normalize_string_values(&ctx.vary_query_keys);

    if normalized_vary_headers.is_empty() && normalized_query_keys.is_empty() {
        return;
    }

    let rules = match ctx.cached_vary_rules.take() {
        Some(existing)
            if existing.matches(&normalized_vary_headers, &normalized_query_keys) =>
        {
            existing
        }
        _ => CachedVaryByRules {
            vary_key_prefix: Uuid::new_v4().simple().to_string(),
            headers: normalized_vary_headers,
            query_keys: normalized_query_keys,
        },
    };

    Diagnostic::VaryByRulesUpdated.emit();
    match codec.encode(&CachedEntry::VaryRules(rules.clone())) {
        Ok(encoded) => {
            if let Err(err) = storage.set(ctx.base_key.clone(), encoded, valid_for).await {
                tracing::warn!(target: TRACE_TARGET, error = %err, "failed to store vary rules");
            }
        }
        Err(err) => {
            tracing::warn!(target: TRACE_TARGET, error = %err, "failed to encode vary rules");
        }
    }

    let storage_vary_key =
        keys.storage_vary_key(&ctx.base_key, &ctx.request_headers, &ctx.uri, &rules);
    ctx.set_storage_vary_key(storage_vary_key);
    ctx.cached_vary_rules = Some(rules);
}

/// Builds the end-of-stream callback that snapshots the response and
/// spawns the storage write.
fn commit_action<S, C>(
    ctx: &RequestContext,
    storage: &S,
    codec: &C,
    response_headers: &HeaderMap,
    status: StatusCode,
) -> Box<dyn FnOnce(SegmentedBody) + Send>
where
    S: CacheStorage,
    C: CacheCodec,
{
    let storage = storage.clone();
    let codec = codec.clone();
    let key = ctx.storage_key().to_owned();
    let valid_for = ctx
        .cached_response_valid_for
        .unwrap_or(crate::policy::DEFAULT_VALIDITY);
    let created = ctx.response_time;
    let headers = snapshot_headers(response_headers);

    Box::new(move |body| {
        let entry = CachedEntry::Response(CachedResponse {
            created,
            status,
            headers,
            body,
        });
        let encoded = match codec.encode(&entry) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(target: TRACE_TARGET, error = %err, "failed to encode cached response");
                Diagnostic::ResponseNotCached.emit();
                return;
            }
        };

        Diagnostic::ResponseCached.emit();
        #[cfg(feature = "metrics")]
        counter!("tower_response_cache.store").increment(1);

        // The write is fire-and-forget; readers racing it simply miss.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = storage.set(key, encoded, valid_for).await {
                        tracing::warn!(
                            target: TRACE_TARGET,
                            error = %err,
                            "failed to store cached response"
                        );
                        #[cfg(feature = "metrics")]
                        counter!("tower_response_cache.store_error").increment(1);
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    target: TRACE_TARGET,
                    "no tokio runtime available; cached response dropped"
                );
            }
        }
    })
}

async fn lookup<S, C>(storage: &S, codec: &C, key: &str) -> Option<CachedEntry>
where
    S: CacheStorage,
    C: CacheCodec,
{
    match storage.get(key).await {
        Ok(Some(bytes)) => match codec.decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(target: TRACE_TARGET, error = %err, "failed to decode cached entry");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            // A failing storage read is a miss, not an error.
            tracing::warn!(target: TRACE_TARGET, error = %err, "storage read failed");
            None
        }
    }
}

/// RFC 7232 precondition evaluation against the cached headers.
///
/// `If-None-Match` takes precedence; when present but unmatched, the
/// request is *not* re-examined under `If-Unmodified-Since`.
fn content_is_not_modified(
    request_headers: &HeaderMap,
    cached_headers: &HeaderMap,
) -> Option<Diagnostic> {
    if request_headers.contains_key(header::IF_NONE_MATCH) {
        let tags: Vec<&str> =
            headers::string_values(request_headers, &header::IF_NONE_MATCH)
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .collect();

        if tags.iter().any(|tag| *tag == "*") {
            return Some(Diagnostic::NotModifiedIfNoneMatchStar);
        }

        if let Some(cached_etag) = cached_headers
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
        {
            if tags.iter().any(|tag| weak_etag_eq(tag, cached_etag)) {
                return Some(Diagnostic::NotModifiedIfNoneMatchMatched);
            }
        }
        return None;
    }

    let threshold = request_headers
        .get(header::IF_UNMODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(headers::try_parse_date)?;
    let resource_time = cached_headers
        .get(header::LAST_MODIFIED)
        .or_else(|| cached_headers.get(header::DATE))
        .and_then(|value| value.to_str().ok())
        .and_then(headers::try_parse_date)?;

    if resource_time <= threshold {
        return Some(Diagnostic::NotModifiedIfUnmodifiedSinceSatisfied);
    }
    None
}

/// RFC 7232 weak comparison: the weakness prefix is ignored and the opaque
/// tags are compared verbatim.
fn weak_etag_eq(a: &str, b: &str) -> bool {
    fn opaque(tag: &str) -> &str {
        tag.strip_prefix("W/").or_else(|| tag.strip_prefix("w/")).unwrap_or(tag)
    }
    opaque(a) == opaque(b)
}

/// Correlation id for the per-request tracing span: the `X-Request-ID`
/// header when the pipeline supplies one, otherwise a minted id in the same
/// form as the Vary key prefixes.
fn correlation_id<B>(req: &Request<B>) -> String {
    req.headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn snapshot_headers(headers: &HeaderMap) -> Vec<(String, Vec<u8>)> {
    headers
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
        .collect()
}

//! Admission control layer.
//!
//! Each request is mapped to an [`AdmissionKey`] (client + operation) by a
//! [`KeyExtractor`]. The operation selects the effective [`RateConfig`]
//! (per-operation override or default) and the full key selects the bucket
//! in the shared [`RateLimiterRegistry`].
//!
//! A rejected request never reaches the inner handler. The rejection is
//! logged at warn level with `ip` and `operation` as separate fields and
//! recorded as [`PipelineError::AdmissionRejected`], which renders as
//! `429 Too Many Requests` with `Retry-After` when the bucket refills.
//!
//! [`RateConfig`]: crate::limiter::RateConfig

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};

use super::ip::client_ip;
use super::{ResponseFuture, reject};
use crate::context::RequestContextExt;
use crate::error::PipelineError;
use crate::limiter::{Admission, RateLimitConfig, RateLimiterRegistry};
use crate::logger::{Fields, SharedLogger};
use crate::metrics;

/// Client and operation identifiers selecting a rate bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionKey {
    pub client: String,
    pub operation: String,
}

impl AdmissionKey {
    pub fn new(client: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for AdmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.operation)
    }
}

/// Derives the admission key for a request.
pub trait KeyExtractor: Send + Sync + 'static {
    fn extract(&self, req: &Request<Body>) -> AdmissionKey;
}

impl<F> KeyExtractor for F
where
    F: Fn(&Request<Body>) -> AdmissionKey + Send + Sync + 'static,
{
    fn extract(&self, req: &Request<Body>) -> AdmissionKey {
        self(req)
    }
}

/// Client IP plus `METHOD:path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestKeyExtractor;

impl KeyExtractor for RestKeyExtractor {
    fn extract(&self, req: &Request<Body>) -> AdmissionKey {
        AdmissionKey {
            client: client_ip(req).into_owned(),
            operation: format!("{}:{}", req.method(), req.uri().path()),
        }
    }
}

/// Rate limiting layer.
///
/// ```rust,ignore
/// let registry = Arc::new(RateLimiterRegistry::default());
/// let config = RateLimitConfig::new(RateConfig::new(10.0, 20));
/// let layer = RateLimitLayer::new(registry, config, TracingLogger::shared());
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    registry: Arc<RateLimiterRegistry>,
    config: Arc<RateLimitConfig>,
    extractor: Arc<dyn KeyExtractor>,
    logger: SharedLogger,
}

impl RateLimitLayer {
    pub fn new(
        registry: Arc<RateLimiterRegistry>,
        config: RateLimitConfig,
        logger: SharedLogger,
    ) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            extractor: Arc::new(RestKeyExtractor),
            logger,
        }
    }

    /// Replace the default [`RestKeyExtractor`].
    pub fn with_extractor(mut self, extractor: impl KeyExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            registry: self.registry.clone(),
            config: self.config.clone(),
            extractor: self.extractor.clone(),
            logger: self.logger.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    registry: Arc<RateLimiterRegistry>,
    config: Arc<RateLimitConfig>,
    extractor: Arc<dyn KeyExtractor>,
    logger: SharedLogger,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let key = self.extractor.extract(&req);
        let config = self.config.for_operation(&key.operation);

        match self.registry.check(&key.to_string(), config) {
            Admission::Admitted => Box::pin(self.inner.call(req)),
            Admission::Rejected { retry_after } => {
                let ctx = req.request_context();
                let snapshot = ctx.as_ref().map(|c| c.snapshot());
                self.logger.warn(
                    snapshot.as_ref(),
                    "rate limit exceeded",
                    Fields::new()
                        .with("ip", &key.client)
                        .with("operation", &key.operation),
                );
                metrics::record_admission_rejected(&key.operation);

                // Round up so clients never retry before a token exists
                let retry_after_secs = retry_after.map(|d| d.as_secs_f64().ceil().max(1.0) as u64);
                let response = reject(
                    ctx.as_ref(),
                    PipelineError::AdmissionRejected { retry_after_secs },
                );
                Box::pin(async move { Ok::<_, S::Error>(response) })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::limiter::RateConfig;
    use crate::logger::{Level, MemoryLogger};
    use axum::http::StatusCode;
    use axum::http::header::RETRY_AFTER;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{ServiceExt, service_fn};

    fn request(method: &str, path: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_rest_extractor() {
        let key = RestKeyExtractor.extract(&request("POST", "/tokens?x=1", "10.0.0.1"));
        assert_eq!(key, AdmissionKey::new("10.0.0.1", "POST:/tokens"));
        assert_eq!(key.to_string(), "10.0.0.1:POST:/tokens");
    }

    #[tokio::test]
    async fn test_rejection_skips_inner_and_logs_components() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner = service_fn(move |_req: Request<Body>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Body::empty())) }
        });

        let logger = MemoryLogger::new();
        let layer = RateLimitLayer::new(
            Arc::new(RateLimiterRegistry::default()),
            RateLimitConfig::new(RateConfig::new(0.0, 1)),
            logger.clone(),
        );
        let svc = layer.layer(inner);

        let first = svc.clone().oneshot(request("GET", "/a", "1.1.1.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = svc.clone().oneshot(request("GET", "/a", "1.1.1.1")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().get(RETRY_AFTER).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entries = logger.find("rate limit exceeded");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, Level::Warn);
        assert_eq!(entries[0].fields.get("ip"), Some(&json!("1.1.1.1")));
        assert_eq!(entries[0].fields.get("operation"), Some(&json!("GET:/a")));
    }

    #[tokio::test]
    async fn test_operation_override_and_retry_after() {
        let config = RateLimitConfig::new(RateConfig::new(0.0, 5))
            .with_operation("POST:/tokens", RateConfig::new(0.5, 1));
        let svc = RateLimitLayer::new(
            Arc::new(RateLimiterRegistry::default()),
            config,
            MemoryLogger::new(),
        )
        .layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }));

        let ok = svc.clone().oneshot(request("POST", "/tokens", "2.2.2.2")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let limited = svc.clone().oneshot(request("POST", "/tokens", "2.2.2.2")).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = limited.headers()[RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=2).contains(&retry));

        // a different operation uses its own bucket
        let other = svc.clone().oneshot(request("GET", "/tokens", "2.2.2.2")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_extractor() {
        let svc = RateLimitLayer::new(
            Arc::new(RateLimiterRegistry::default()),
            RateLimitConfig::new(RateConfig::new(0.0, 1)),
            MemoryLogger::new(),
        )
        .with_extractor(|req: &Request<Body>| {
            let tenant = req
                .headers()
                .get("x-tenant")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            AdmissionKey::new(tenant, "any")
        })
        .layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }));

        let tenant = |name: &str| {
            Request::builder()
                .uri("/x")
                .header("x-tenant", name)
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(svc.clone().oneshot(tenant("a")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(svc.clone().oneshot(tenant("b")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            svc.clone().oneshot(tenant("a")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}

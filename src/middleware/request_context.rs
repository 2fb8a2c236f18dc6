//! Attaches the per-request [`RequestContext`].
//!
//! Must sit inside [`RequestIdLayer`](super::RequestIdLayer) so the id is
//! already resolved. An `Idempotency-Key` header, when present, is copied
//! into the context.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};

use super::request_id::RequestIdExt;
use crate::context::{RequestContext, RequestContextHandle};

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContextLayer;

impl RequestContextLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContextService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContextService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestContextService<S>
where
    S: Service<Request<Body>, Response = Response<Body>>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut ctx = RequestContext::new(req.request_id().unwrap_or_default());
        if let Some(key) = req
            .headers()
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            ctx.set_idempotency_key(key);
        }

        req.extensions_mut().insert(RequestContextHandle::new(ctx));
        self.inner.call(req)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::{ContextSnapshot, RequestContextExt};
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    async fn snapshot_of(req: Request<Body>) -> Option<ContextSnapshot> {
        let inner = service_fn(|req: Request<Body>| async move {
            let snapshot = req.context_snapshot();
            let body = serde_json::to_vec(&snapshot).unwrap();
            Ok::<_, Infallible>(Response::new(Body::from(body)))
        });
        let response = RequestContextLayer::new().layer(inner).oneshot(req).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value.as_object().map(|obj| ContextSnapshot {
            request_id: obj["requestId"].as_str().unwrap().to_string(),
            idempotency_key: obj
                .get("idempotencyKey")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            ..ContextSnapshot::default()
        })
    }

    #[tokio::test]
    async fn test_context_uses_request_id_header() {
        let req = Request::builder()
            .header("x-request-id", "abc")
            .header("Idempotency-Key", "idem-7")
            .body(Body::empty())
            .unwrap();

        let snapshot = snapshot_of(req).await.unwrap();
        assert_eq!(snapshot.request_id, "abc");
        assert_eq!(snapshot.idempotency_key.as_deref(), Some("idem-7"));
    }

    #[tokio::test]
    async fn test_context_without_request_id_generates_one() {
        let snapshot = snapshot_of(Request::new(Body::empty())).await.unwrap();
        assert!(!snapshot.request_id.is_empty());
        assert!(snapshot.idempotency_key.is_none());
    }
}

//! Defaults the response content type to JSON.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, HeaderValue};
use axum::http::{Request, Response};
use tower::{Layer, Service};

use super::ResponseFuture;

/// Sets `Content-Type: application/json` on responses that carry none.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResponseLayer;

impl JsonResponseLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for JsonResponseLayer {
    type Service = JsonResponseService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JsonResponseService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct JsonResponseService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for JsonResponseService<S>
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
        let fut = self.inner.call(req);
        Box::pin(async move {
            let mut response = fut.await?;
            response
                .headers_mut()
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
            Ok(response)
        })
    }
}

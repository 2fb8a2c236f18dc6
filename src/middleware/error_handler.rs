//! Terminal error rendering.
//!
//! After the inner handler returns, the error recorded in the request
//! context (if any) is classified and rendered. This is the only layer that
//! decides the body and status of an error response.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;

use super::ResponseFuture;
use crate::context::RequestContextExt;

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandlerLayer;

impl ErrorHandlerLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ErrorHandlerLayer {
    type Service = ErrorHandlerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorHandlerService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorHandlerService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for ErrorHandlerService<S>
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
        let ctx = req.request_context();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = fut.await?;
            let Some(ctx) = ctx else {
                return Ok(response);
            };

            let rendered = ctx.with(|c| {
                c.error().map(|error| {
                    debug!(kind = error.kind(), status = %error.status_code(), "Rendering recorded error");
                    error.to_response()
                })
            });
            Ok(rendered.unwrap_or(response))
        })
    }
}

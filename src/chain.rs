//! Handler boundary and middleware composition.
//!
//! Every stage of a pipeline is a [`Handler`]: a cloneable, type-erased
//! service from `Request<Body>` to `Response<Body>` that cannot fail. Failures
//! are recorded into the request context instead of being returned, so any
//! handler can wrap any other.
//!
//! A [`Middleware`] turns one handler into another. [`compose`] applies a
//! list of them so the first one is outermost:
//!
//! ```text
//! [A, B, C] around H:   A → B → C → H → C → B → A
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt, service_fn};

use crate::context::RequestContextExt;
use crate::error::PipelineError;
use crate::middleware::reject;

/// A stage of the pipeline.
pub type Handler = BoxCloneSyncService<Request<Body>, Response<Body>, Infallible>;

/// Wraps a handler in another.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Wrap `terminal` in `layers`, first layer outermost.
pub fn compose(terminal: Handler, layers: &[Middleware]) -> Handler {
    layers
        .iter()
        .rev()
        .fold(terminal, |handler, middleware| middleware(handler))
}

/// Invoke `handler` once.
pub async fn next(handler: &Handler, req: Request<Body>) -> Response<Body> {
    let Ok(response) = handler.clone().oneshot(req).await;
    response
}

/// Adapt a tower [`Layer`] into a [`Middleware`].
pub fn from_layer<L>(layer: L) -> Middleware
where
    L: Layer<Handler> + Send + Sync + 'static,
    L::Service: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    <L::Service as Service<Request<Body>>>::Future: Send + 'static,
{
    Arc::new(move |inner| BoxCloneSyncService::new(layer.layer(inner)))
}

/// Adapt an async closure taking the request and the wrapped handler.
///
/// The closure decides whether to call the wrapped handler, through [`next`],
/// and may act on the response it returns.
pub fn from_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Request<Body>, Handler) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    Arc::new(move |inner: Handler| {
        let f = f.clone();
        BoxCloneSyncService::new(service_fn(move |req: Request<Body>| {
            let fut = f(req, inner.clone());
            async move { Ok::<_, Infallible>(fut.await) }
        }))
    })
}

/// Adapt an application handler returning `Result`.
///
/// An `Err` is recorded into the request context and answered with the
/// error's standard rendering.
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Request<Body>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Body>, PipelineError>> + Send + 'static,
{
    BoxCloneSyncService::new(service_fn(move |req: Request<Body>| {
        let ctx = req.request_context();
        let fut = f(req);
        async move {
            Ok::<_, Infallible>(match fut.await {
                Ok(response) => response,
                Err(error) => reject(ctx.as_ref(), error),
            })
        }
    }))
}

/// Ordered list of middleware, first outermost.
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Middleware>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tower layer.
    pub fn layer<L>(self, layer: L) -> Self
    where
        L: Layer<Handler> + Send + Sync + 'static,
        L::Service: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        self.push(from_layer(layer))
    }

    /// Append an async closure middleware.
    pub fn wrap<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Request<Body>, Handler) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response<Body>> + Send + 'static,
    {
        self.push(from_fn(f))
    }

    pub fn push(mut self, middleware: Middleware) -> Self {
        self.layers.push(middleware);
        self
    }

    pub fn extend(mut self, middleware: impl IntoIterator<Item = Middleware>) -> Self {
        self.layers.extend(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Build the composed handler around `terminal`.
    pub fn handler(&self, terminal: Handler) -> Handler {
        compose(terminal, &self.layers)
    }
}

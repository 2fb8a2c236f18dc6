//! Pipeline layers.
//!
//! Every layer is a tower `Layer`/`Service` pair over `Request<Body>` and
//! `Response<Body>`, so each one can be mounted on an axum `Router` directly
//! or composed into a [`Chain`](crate::chain::Chain).
//!
//! # Default order
//!
//! ```text
//! Request → Cors → JsonResponse → RequestId → RequestContext → Log
//!         → ErrorHandler → Recover → RateLimit → Auth → Handler
//! ```
//!
//! Layers below `ErrorHandler` never render error bodies on their own
//! authority: they record a [`PipelineError`] into the request context and
//! return the placeholder produced by [`reject`]. `ErrorHandler` then writes
//! the one response the client sees, and `Log` observes it.

pub mod auth;
pub mod cors;
pub mod error_handler;
pub mod ip;
pub mod json_response;
pub mod log;
pub mod rate_limit;
pub mod recover;
pub mod request_context;
pub mod request_id;

use std::future::Future;
use std::pin::Pin;

use axum::body::Body;
use axum::http::Response;

use crate::context::RequestContextHandle;
use crate::error::PipelineError;

pub use auth::{AuthLayer, AuthMode};
pub use cors::cors_layer;
pub use error_handler::ErrorHandlerLayer;
pub use ip::{UNKNOWN_IP, client_ip};
pub use json_response::JsonResponseLayer;
pub use log::{LogLayer, LogOptions};
pub use rate_limit::{AdmissionKey, KeyExtractor, RateLimitLayer, RestKeyExtractor};
pub use recover::RecoverLayer;
pub use request_context::{IDEMPOTENCY_KEY_HEADER, RequestContextLayer};
pub use request_id::{REQUEST_ID_HEADER, RequestIdExt, RequestIdLayer};

/// Boxed response future shared by the layer services.
pub(crate) type ResponseFuture<E> =
    Pin<Box<dyn Future<Output = Result<Response<Body>, E>> + Send>>;

/// Record `error` into the request context and return its rendering.
///
/// Without a context the rendering is all that is left of the error.
pub(crate) fn reject(ctx: Option<&RequestContextHandle>, error: PipelineError) -> Response<Body> {
    let response = error.to_response();
    if let Some(ctx) = ctx {
        ctx.set_error(error);
    }
    response
}

//! # Request Pipeline
//!
//! A composable HTTP request-processing pipeline for Axum services:
//!
//! - **Composition**: type-erased handlers wrapped by ordered middleware
//! - **Admission control**: per-(client, operation) token buckets with sweeping
//! - **Observability**: one redacted log record per request, Prometheus metrics
//! - **Resilience**: panic recovery and uniform JSON error rendering
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline (CORS → JSON → Request ID → Context → Log →       │
//! │            Error handler → Recover → Rate limit → Auth)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, echo, tokens, me)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Collaborators (RateLimiterRegistry, Authenticator, Logger) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use request_pipeline::chain::handler_fn;
//! use request_pipeline::logger::TracingLogger;
//! use request_pipeline::pipeline::Pipeline;
//! use axum::body::Body;
//! use axum::http::Response;
//!
//! use request_pipeline::PipelineError;
//!
//! let handler = Pipeline::new(TracingLogger::shared()).handler(handler_fn(|_req| async {
//!     Ok::<_, PipelineError>(Response::new(Body::from("{}")))
//! }));
//! let app: axum::Router = axum::Router::new().route_service("/", handler);
//! # let _ = app;
//! ```

pub mod auth;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod logger;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod redact;
pub mod routes;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use chain::{Chain, Handler, Middleware, compose, handler_fn};
pub use config::Config;
pub use context::{RequestContext, RequestContextExt, RequestContextHandle};
pub use error::{AuthError, PipelineError};
pub use limiter::{RateConfig, RateLimitConfig, RateLimiterRegistry};
pub use pipeline::Pipeline;
pub use redact::{REDACTED, RedactionRules, redact};
pub use routes::build_router;
pub use state::AppState;

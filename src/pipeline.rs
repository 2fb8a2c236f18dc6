//! The standard middleware stack.
//!
//! [`Pipeline`] assembles the shipped layers in their canonical order, first
//! outermost:
//!
//! ```text
//! Request
//!    │
//!    ▼
//!  CORS (optional)        ← preflight answered here
//!  JSON response          ← Content-Type default
//!  Request ID             ← X-Request-ID resolved or generated
//!  Request context        ← one context per request
//!  Log                    ← one entry per request, redacted
//!  Error handler          ← the only error rendering
//!  Recover                ← panics become errors
//!  Rate limit (optional)  ← 429 if exceeded
//!  Auth (optional)        ← 401 if required and invalid
//!    │
//!    ▼
//!  Handler
//! ```
//!
//! Log sits outside the error handler so it records the final status, and
//! recover sits inside it so a panic is rendered like any other error.

use tower_http::cors::CorsLayer;

use crate::chain::{Chain, Handler};
use crate::logger::SharedLogger;
use crate::middleware::{
    AuthLayer, ErrorHandlerLayer, JsonResponseLayer, LogLayer, LogOptions, RateLimitLayer,
    RecoverLayer, RequestContextLayer, RequestIdLayer,
};

/// Builder for the standard stack.
#[derive(Clone)]
pub struct Pipeline {
    logger: SharedLogger,
    log_options: LogOptions,
    cors: Option<CorsLayer>,
    rate_limit: Option<RateLimitLayer>,
    auth: Option<AuthLayer>,
}

impl Pipeline {
    pub fn new(logger: SharedLogger) -> Self {
        Self {
            logger,
            log_options: LogOptions::default(),
            cors: None,
            rate_limit: None,
            auth: None,
        }
    }

    pub fn with_log_options(mut self, options: LogOptions) -> Self {
        self.log_options = options;
        self
    }

    pub fn with_cors(mut self, cors: CorsLayer) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn with_rate_limit(mut self, layer: RateLimitLayer) -> Self {
        self.rate_limit = Some(layer);
        self
    }

    pub fn with_auth(mut self, layer: AuthLayer) -> Self {
        self.auth = Some(layer);
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.auth = None;
        self
    }

    pub fn logger(&self) -> &SharedLogger {
        &self.logger
    }

    /// The configured layers in canonical order.
    pub fn layers(&self) -> Chain {
        let mut chain = Chain::new();
        if let Some(cors) = &self.cors {
            chain = chain.layer(cors.clone());
        }

        chain = chain
            .layer(JsonResponseLayer::new())
            .layer(RequestIdLayer::new())
            .layer(RequestContextLayer::new())
            .layer(LogLayer::new(self.logger.clone(), self.log_options.clone()))
            .layer(ErrorHandlerLayer::new())
            .layer(RecoverLayer::new(self.logger.clone()));

        if let Some(rate_limit) = &self.rate_limit {
            chain = chain.layer(rate_limit.clone());
        }
        if let Some(auth) = &self.auth {
            chain = chain.layer(auth.clone());
        }
        chain
    }

    /// Wrap `terminal` in the full stack.
    pub fn handler(&self, terminal: Handler) -> Handler {
        self.layers().handler(terminal)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("log_options", &self.log_options)
            .field("cors", &self.cors.is_some())
            .field("rate_limit", &self.rate_limit.is_some())
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;

    #[test]
    fn test_layer_count_follows_options() {
        let pipeline = Pipeline::new(MemoryLogger::new());
        assert_eq!(pipeline.layers().len(), 6);

        let pipeline = pipeline.with_cors(crate::middleware::cors_layer(&["*".to_string()]));
        assert_eq!(pipeline.layers().len(), 7);
        assert!(format!("{pipeline:?}").contains("cors: true"));
    }
}

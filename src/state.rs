//! Shared application state.
//!
//! Holds the configuration, the rate limiter registry, the authenticators
//! and the logger every pipeline is built with. It is cloned into each
//! route handler; all internal data is wrapped in `Arc`.
//!
//! # Structured Concurrency
//!
//! The bucket sweeper is managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop it before application exit.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::auth::{BasicAuthenticator, Jwt};
use crate::config::Config;
use crate::limiter::RateLimiterRegistry;
use crate::logger::{SharedLogger, TracingLogger};
use crate::middleware::{RateLimitLayer, cors_layer};
use crate::pipeline::Pipeline;

/// Shared application state.
///
/// Background tasks are spawned when the state is created. Call `shutdown()`
/// before dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(config, TracingLogger::shared());
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Timestamp when the application started
    pub started_at: Instant,
    pub registry: Arc<RateLimiterRegistry>,
    pub logger: SharedLogger,
    /// Token issuer/verifier, when `JWT_SECRET` is set
    pub jwt: Option<Arc<Jwt>>,
    /// Basic credentials, when configured
    pub basic: Option<Arc<BasicAuthenticator>>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create the state and start the bucket sweeper.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: Config, logger: SharedLogger) -> Self {
        let registry = Arc::new(RateLimiterRegistry::new(config.rate_limit_eviction));
        let jwt = config
            .jwt_secret
            .as_ref()
            .map(|secret| Arc::new(Jwt::new(secret.as_bytes(), config.jwt_settings())));
        let basic = config
            .basic_credentials()
            .map(|(user, pass)| Arc::new(BasicAuthenticator::new(user, pass)));
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        if config.rate_limit_enabled {
            registry.spawn_sweeper(
                config.rate_limit_sweep_interval,
                &task_tracker,
                cancellation_token.child_token(),
            );
        }

        Self {
            config: Arc::new(config),
            started_at: Instant::now(),
            registry,
            logger,
            jwt,
            basic,
            task_tracker,
            cancellation_token,
        }
    }

    /// State with the [`TracingLogger`].
    pub fn with_tracing(config: Config) -> Self {
        Self::new(config, TracingLogger::shared())
    }

    /// The standard stack configured from [`Config`], without authentication.
    ///
    /// Routes add their own [`AuthLayer`](crate::middleware::AuthLayer).
    pub fn pipeline(&self) -> Pipeline {
        let config = &self.config;
        let mut pipeline =
            Pipeline::new(self.logger.clone()).with_log_options(config.log_options());

        if !config.cors_allowed_origins.is_empty() {
            pipeline = pipeline.with_cors(cors_layer(&config.cors_allowed_origins));
        }
        if config.rate_limit_enabled {
            pipeline = pipeline.with_rate_limit(RateLimitLayer::new(
                self.registry.clone(),
                config.rate_limit_config(),
                self.logger.clone(),
            ));
        }
        pipeline
    }

    /// Gracefully shutdown all background tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        // Signal all tasks to stop
        self.cancellation_token.cancel();

        // Close the tracker - no new tasks can be spawned
        self.task_tracker.close();

        // Wait for all tasks to complete
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

//! Health endpoint.
//!
//! - `GET /health` - Liveness with version, uptime and limiter occupancy

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PipelineError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Live rate limit buckets
    pub buckets: usize,
    pub timestamp: DateTime<Utc>,
}

/// Always returns 200 OK.
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 12,
///   "buckets": 3,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
pub async fn health_check(
    state: AppState,
    _req: Request<Body>,
) -> Result<Response<Body>, PipelineError> {
    Ok(Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        buckets: state.registry.len(),
        timestamp: Utc::now(),
    })
    .into_response())
}

//! Request/response logging.
//!
//! One entry per request, emitted after the response is produced:
//!
//! ```text
//! [in-http] POST example.com/tokens 200 in 1.2ms
//! ```
//!
//! The entry's fields hold a log record with the request (start time,
//! endpoint, headers, body) and the response (completion time, status,
//! headers, body). The record passes through the configured
//! [`RedactionRules`] before it reaches the logger. Bodies are buffered only
//! when their size is known to be within `max_body_bytes`; larger or
//! streaming bodies pass through untouched and are logged as empty.
//!
//! The level follows the error recorded in the request context: none is
//! `info`, client errors are `warn`, faults are `error`.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{Request, Response};
use chrono::{SecondsFormat, Utc};
use http_body_util::{BodyExt, Limited};
use serde_json::{Value, json};
use tower::{Layer, Service};
use tracing::warn;

use super::ResponseFuture;
use super::ip::{client_ip, remote_addr};
use crate::context::RequestContextExt;
use crate::logger::{Fields, Level, SharedLogger};
use crate::metrics;
use crate::redact::{RedactionRules, headers_to_value};

/// Default cap on buffered body size.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// What the log layer records.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub redaction: RedactionRules,
    /// Bodies larger than this are not buffered.
    pub max_body_bytes: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            redaction: RedactionRules::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct LogLayer {
    logger: SharedLogger,
    options: Arc<LogOptions>,
    hostname: Arc<str>,
}

impl LogLayer {
    pub fn new(logger: SharedLogger, options: LogOptions) -> Self {
        Self {
            logger,
            options: Arc::new(options),
            hostname: Arc::from(hostname()),
        }
    }
}

impl<S> Layer<S> for LogLayer {
    type Service = LogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LogService {
            inner,
            logger: self.logger.clone(),
            options: self.options.clone(),
            hostname: self.hostname.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LogService<S> {
    inner: S,
    logger: SharedLogger,
    options: Arc<LogOptions>,
    hostname: Arc<str>,
}

impl<S> Service<Request<Body>> for LogService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The clone is ready; keep the readied service for this call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let logger = self.logger.clone();
        let options = self.options.clone();
        let hostname = self.hostname.clone();

        Box::pin(async move {
            let started = Instant::now();
            let started_at = Utc::now();
            let ctx = req.request_context();

            let method = req.method().clone();
            let uri = req.uri().clone();
            let host = req
                .headers()
                .get(axum::http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .or_else(|| uri.host())
                .unwrap_or_default()
                .to_string();
            let target = uri
                .path_and_query()
                .map_or_else(|| uri.path().to_string(), ToString::to_string);
            let endpoint = format!("{method} {host}{target} {:?}", req.version());
            let remote = remote_addr(&req).map_or_else(|| client_ip(&req).into_owned(), |a| a.to_string());
            let request_headers = headers_to_value(req.headers());

            let (parts, body) = req.into_parts();
            let (request_body, body) = capture(body, options.max_body_bytes).await;
            let response = inner.call(Request::from_parts(parts, body)).await?;

            let status = response.status();
            let (parts, body) = response.into_parts();
            let response_headers = headers_to_value(&parts.headers);
            let (response_body, body) = capture(body, options.max_body_bytes).await;
            let response = Response::from_parts(parts, body);

            let elapsed = started.elapsed();
            let record = json!({
                "hostname": &*hostname,
                "remote_address": remote,
                "request": {
                    "started_at": started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "endpoint": endpoint,
                    "headers": request_headers,
                    "body": request_body,
                },
                "response": {
                    "completed_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                    "status_code": status.as_u16(),
                    "headers": response_headers,
                    "body": response_body,
                },
                "duration_ms": elapsed.as_secs_f64() * 1000.0,
            });
            let fields = match options.redaction.apply(&record) {
                Value::Object(map) => Fields::from(map),
                _ => Fields::new(),
            };

            let (level, snapshot) = match &ctx {
                Some(ctx) => ctx.with(|c| {
                    let level = c.error().map_or(Level::Info, |e| e.log_level());
                    (level, Some(c.snapshot()))
                }),
                None => (Level::Info, None),
            };
            let message = format!("[in-http] {method} {host}{target} {} in {elapsed:?}", status.as_u16());
            logger.log(level, snapshot.as_ref(), &message, fields);
            metrics::record_request(method.as_str(), status.as_u16(), elapsed);

            Ok(response)
        })
    }
}

/// Buffer `body` when its size is known and within `limit`.
///
/// Returns the text to log and the body to forward. When reading fails
/// partway, the forwarded body yields that error instead of the lost bytes.
async fn capture(body: Body, limit: usize) -> (String, Body) {
    let within_limit = body
        .size_hint()
        .upper()
        .is_some_and(|upper| usize::try_from(upper).is_ok_and(|n| n <= limit));
    if !within_limit {
        return (String::new(), body);
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            (String::from_utf8_lossy(&bytes).into_owned(), Body::from(bytes))
        }
        Err(e) => {
            warn!(error = %e, "Failed to buffer body for logging");
            let text = format!("<unreadable body: {e}>");
            let failed = Body::from_stream(futures_util::stream::once(async move { Err::<Bytes, _>(e) }));
            (text, failed)
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::{RequestContext, RequestContextHandle};
    use crate::error::PipelineError;
    use crate::logger::MemoryLogger;
    use crate::redact::REDACTED;
    use axum::body::to_bytes;
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    async fn echo(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let bytes = to_bytes(req.into_body(), usize::MAX).await.unwrap();
        Ok(Response::new(Body::from(bytes)))
    }

    fn options(request_paths: &[&str], response_paths: &[&str]) -> LogOptions {
        LogOptions {
            redaction: RedactionRules::new(
                request_paths.iter().map(|p| p.to_string()).collect(),
                response_paths.iter().map(|p| p.to_string()).collect(),
            ),
            ..LogOptions::default()
        }
    }

    #[tokio::test]
    async fn test_logs_redacted_record_and_forwards_bodies() {
        let logger = MemoryLogger::new();
        let svc = LogLayer::new(
            logger.clone(),
            options(&["headers.authorization", "body.password"], &["body.password"]),
        )
        .layer(service_fn(echo));

        let req = Request::builder()
            .method("POST")
            .uri("/login?next=home")
            .header("host", "api.example")
            .header("Authorization", "Bearer secret")
            .body(Body::from(r#"{"user":"ray","password":"p1"}"#))
            .unwrap();
        let response = svc.oneshot(req).await.unwrap();

        // the handler saw the original body
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"user":"ray","password":"p1"}"#);

        let entries = logger.find("[in-http] POST api.example/login?next=home 200 in ");
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.level, Level::Info);

        let request = entry.fields.get("request").unwrap();
        assert_eq!(request["headers"]["authorization"], json!([REDACTED]));
        let body: Value = serde_json::from_str(request["body"].as_str().unwrap()).unwrap();
        assert_eq!(body, json!({ "user": "ray", "password": REDACTED }));

        let response = entry.fields.get("response").unwrap();
        assert_eq!(response["status_code"], 200);
        let body: Value = serde_json::from_str(response["body"].as_str().unwrap()).unwrap();
        assert_eq!(body["password"], REDACTED);
    }

    #[tokio::test]
    async fn test_level_follows_context_error() {
        let logger = MemoryLogger::new();
        let svc = LogLayer::new(logger.clone(), LogOptions::default()).layer(service_fn(
            |req: Request<Body>| async move {
                req.set_error(PipelineError::from(anyhow::anyhow!("db down")));
                Ok::<_, Infallible>(Response::new(Body::empty()))
            },
        ));

        let handle = RequestContextHandle::new(RequestContext::new("req-err"));
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(handle);
        svc.oneshot(req).await.unwrap();

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, Level::Error);
        let ctx = entries[0].context.as_ref().unwrap();
        assert_eq!(ctx.request_id, "req-err");
        assert_eq!(ctx.error.as_deref(), Some("db down"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_not_buffered() {
        let logger = MemoryLogger::new();
        let svc = LogLayer::new(
            logger.clone(),
            LogOptions {
                max_body_bytes: 4,
                ..LogOptions::default()
            },
        )
        .layer(service_fn(echo));

        let response = svc
            .oneshot(Request::new(Body::from("0123456789")))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"0123456789");

        let entry = &logger.entries()[0];
        assert_eq!(entry.fields.get("request").unwrap()["body"], "");
    }

    #[tokio::test]
    async fn test_body_read_failure_reaches_handler() {
        let logger = MemoryLogger::new();
        let svc = LogLayer::new(logger.clone(), LogOptions::default()).layer(service_fn(
            |req: Request<Body>| async move {
                let status = match to_bytes(req.into_body(), usize::MAX).await {
                    Ok(_) => axum::http::StatusCode::OK,
                    Err(_) => axum::http::StatusCode::BAD_REQUEST,
                };
                let mut response = Response::new(Body::empty());
                *response.status_mut() = status;
                Ok::<_, Infallible>(response)
            },
        ));

        // advertises 5 bytes but carries 10, so reading fails partway
        let short = Limited::new(http_body_util::Full::new(Bytes::from_static(b"0123456789")), 5);
        let response = svc.oneshot(Request::new(Body::new(short))).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);

        let entry = &logger.entries()[0];
        let logged = entry.fields.get("request").unwrap()["body"].as_str().unwrap();
        assert!(logged.starts_with("<unreadable body"));
    }
}

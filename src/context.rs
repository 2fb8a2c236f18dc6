//! Request-scoped mutable context.
//!
//! Exactly one [`RequestContext`] exists per request. It is created by the
//! [`RequestContextLayer`](crate::middleware::RequestContextLayer) right after
//! request-id resolution and attached to the request extensions as a
//! [`RequestContextHandle`]. Downstream layers record identity and failures
//! into it; the error-handling and logging layers read it on the way out.
//!
//! The handle is shared only between the layers of a single request, so the
//! lock inside it is never contended across requests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::http::Request;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PipelineError;

/// Per-request identity and error state.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    user_id: Option<i64>,
    idempotency_key: Option<String>,
    error: Option<PipelineError>,
    error_stack: Option<String>,
}

impl RequestContext {
    /// Create a context for `request_id`. An empty id is replaced with a fresh UUID.
    pub fn new(request_id: impl Into<String>) -> Self {
        let mut request_id = request_id.into();
        if request_id.is_empty() {
            request_id = Uuid::new_v4().to_string();
        }
        Self {
            request_id,
            user_id: None,
            idempotency_key: None,
            error: None,
            error_stack: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn error_stack(&self) -> Option<&str> {
        self.error_stack.as_deref()
    }

    pub fn set_user_id(&mut self, user_id: i64) -> &mut Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn set_idempotency_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn set_error(&mut self, error: impl Into<PipelineError>) -> &mut Self {
        self.error = Some(error.into());
        self
    }

    pub fn set_error_stack(&mut self, stack: impl Into<String>) -> &mut Self {
        self.error_stack = Some(stack.into());
        self
    }

    /// Serializable view used for logging. Absent fields are omitted.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            request_id: self.request_id.clone(),
            user_id: self.user_id,
            idempotency_key: self.idempotency_key.clone(),
            error: self.error.as_ref().map(ToString::to_string),
            error_stack: self.error_stack.clone(),
        }
    }
}

/// Point-in-time copy of a [`RequestContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
}

/// Shared handle to the context of one request.
#[derive(Debug, Clone)]
pub struct RequestContextHandle(Arc<Mutex<RequestContext>>);

impl RequestContextHandle {
    pub fn new(ctx: RequestContext) -> Self {
        Self(Arc::new(Mutex::new(ctx)))
    }

    // A panic recovered elsewhere never leaves the context half-written:
    // every mutation is a single field assignment.
    fn lock(&self) -> MutexGuard<'_, RequestContext> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the context.
    pub fn with<R>(&self, f: impl FnOnce(&mut RequestContext) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn request_id(&self) -> String {
        self.lock().request_id.clone()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.lock().user_id
    }

    pub fn has_error(&self) -> bool {
        self.lock().error.is_some()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        self.lock().snapshot()
    }

    pub fn set_user_id(&self, user_id: i64) {
        self.lock().set_user_id(user_id);
    }

    pub fn set_idempotency_key(&self, key: impl Into<String>) {
        self.lock().set_idempotency_key(key);
    }

    pub fn set_error(&self, error: impl Into<PipelineError>) {
        self.lock().set_error(error);
    }

    pub fn set_error_stack(&self, stack: impl Into<String>) {
        self.lock().set_error_stack(stack);
    }
}

/// Access to the request context from a request.
///
/// Every setter is a no-op when the request carries no context.
pub trait RequestContextExt {
    fn request_context(&self) -> Option<RequestContextHandle>;

    fn context_snapshot(&self) -> Option<ContextSnapshot> {
        self.request_context().map(|ctx| ctx.snapshot())
    }

    fn set_user_id(&self, user_id: i64) {
        if let Some(ctx) = self.request_context() {
            ctx.set_user_id(user_id);
        }
    }

    fn set_idempotency_key(&self, key: &str) {
        if let Some(ctx) = self.request_context() {
            ctx.set_idempotency_key(key);
        }
    }

    fn set_error(&self, error: PipelineError) {
        if let Some(ctx) = self.request_context() {
            ctx.set_error(error);
        }
    }

    fn set_error_stack(&self, stack: &str) {
        if let Some(ctx) = self.request_context() {
            ctx.set_error_stack(stack);
        }
    }
}

impl<B> RequestContextExt for Request<B> {
    fn request_context(&self) -> Option<RequestContextHandle> {
        self.extensions().get::<RequestContextHandle>().cloned()
    }
}

//! Authentication layer.
//!
//! [`AuthMode::Required`] rejects requests the [`Authenticator`] refuses: the
//! failure is recorded as an auth error and the inner handler is skipped.
//! [`AuthMode::Optional`] always continues and only records the user id when
//! authentication succeeds.
//!
//! On success the [`Identity`] is inserted into request extensions and its
//! user id, if any, is written to the request context.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};

use super::{ResponseFuture, reject};
use crate::auth::{Authenticator, Identity};
use crate::context::RequestContextExt;
use crate::logger::{Fields, SharedLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Required,
    Optional,
}

#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<dyn Authenticator>,
    mode: AuthMode,
    logger: SharedLogger,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<dyn Authenticator>, mode: AuthMode, logger: SharedLogger) -> Self {
        Self {
            authenticator,
            mode,
            logger,
        }
    }

    pub fn required(authenticator: impl Authenticator, logger: SharedLogger) -> Self {
        Self::new(Arc::new(authenticator), AuthMode::Required, logger)
    }

    pub fn optional(authenticator: impl Authenticator, logger: SharedLogger) -> Self {
        Self::new(Arc::new(authenticator), AuthMode::Optional, logger)
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: self.authenticator.clone(),
            mode: self.mode,
            logger: self.logger.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<dyn Authenticator>,
    mode: AuthMode,
    logger: SharedLogger,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        match self.authenticator.authenticate(&req) {
            Ok(identity) => {
                if let Some(user_id) = identity.user_id {
                    req.set_user_id(user_id);
                }
                req.extensions_mut().insert(identity);
                Box::pin(self.inner.call(req))
            }
            Err(error) if self.mode == AuthMode::Optional => {
                let snapshot = req.context_snapshot();
                self.logger.debug(
                    snapshot.as_ref(),
                    "optional authentication failed",
                    Fields::new().with_error(&error),
                );
                req.extensions_mut().insert(Identity::anonymous());
                Box::pin(self.inner.call(req))
            }
            Err(error) => {
                let ctx = req.request_context();
                let response = reject(ctx.as_ref(), error.into());
                Box::pin(async move { Ok::<_, S::Error>(response) })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::BasicAuthenticator;
    use crate::context::{RequestContext, RequestContextHandle};
    use crate::logger::MemoryLogger;
    use axum::http::StatusCode;
    use axum::http::header::AUTHORIZATION;
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    struct UserFromHeader;

    impl Authenticator for UserFromHeader {
        fn authenticate(&self, req: &Request<Body>) -> Result<Identity, crate::error::AuthError> {
            req.headers()
                .get("x-user")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .map(Identity::user)
                .ok_or_else(|| crate::error::AuthError::new("no user"))
        }
    }

    async fn echo_identity(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let identity = req.extensions().get::<Identity>().copied();
        let body = format!("{:?}", identity.and_then(|i| i.user_id));
        Ok(Response::new(Body::from(body)))
    }

    fn with_context(user: Option<&str>) -> (Request<Body>, RequestContextHandle) {
        let handle = RequestContextHandle::new(RequestContext::new("req-1"));
        let mut builder = Request::builder();
        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut().insert(handle.clone());
        (req, handle)
    }

    #[tokio::test]
    async fn test_required_sets_user_id() {
        let svc = AuthLayer::required(UserFromHeader, MemoryLogger::new()).layer(service_fn(echo_identity));
        let (req, handle) = with_context(Some("42"));

        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(handle.user_id(), Some(42));
    }

    #[tokio::test]
    async fn test_required_rejects_and_records() {
        let svc = AuthLayer::required(BasicAuthenticator::new("u", "p"), MemoryLogger::new())
            .layer(service_fn(echo_identity));
        let (mut req, handle) = with_context(None);
        req.headers_mut()
            .insert(AUTHORIZATION, "Basic bm9wZTpub3Bl".parse().unwrap());

        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            handle.snapshot().error.as_deref(),
            Some("Unauthorized, Err: invalid token")
        );
    }

    #[tokio::test]
    async fn test_optional_continues_without_user() {
        let logger = MemoryLogger::new();
        let svc = AuthLayer::optional(UserFromHeader, logger.clone()).layer(service_fn(echo_identity));
        let (req, handle) = with_context(None);

        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!handle.has_error());
        assert_eq!(handle.user_id(), None);
        assert_eq!(logger.find("optional authentication failed").len(), 1);
    }
}

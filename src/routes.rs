//! Application routing.
//!
//! Every route is a [`Handler`] wrapped in the standard
//! [`Pipeline`](crate::pipeline::Pipeline); routes differ only in the
//! authentication layer appended to it.
//!
//! # Routes
//!
//! - `GET /health` - Liveness (no auth)
//! - `POST /echo` - Validated echo (optional auth)
//! - `POST /tokens` - Issue tokens (basic auth; needs `JWT_SECRET` and basic credentials)
//! - `POST /tokens/refresh` - New access token (refresh bearer token; needs `JWT_SECRET`)
//! - `GET /me` - Caller identity (access bearer token or basic auth)
//!
//! `OPTIONS` reaches every route so CORS preflight is answered by the stack.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{MethodFilter, on_service};
use tracing::info;

use crate::auth::{Authenticator, EitherAuthenticator, JwtAuthenticator};
use crate::chain::{Handler, handler_fn};
use crate::error::PipelineError;
use crate::handlers;
use crate::middleware::{AuthLayer, AuthMode};
use crate::state::AppState;

const GET: MethodFilter = MethodFilter::GET.or(MethodFilter::OPTIONS);
const POST: MethodFilter = MethodFilter::POST.or(MethodFilter::OPTIONS);

/// Build the application router.
///
/// Token routes are mounted only when their credentials are configured.
pub fn build_router(state: AppState) -> Router {
    let pipeline = state.pipeline();
    let logger = state.logger.clone();
    let caller = caller_authenticator(&state);

    let echo_pipeline = match &caller {
        Some(auth) => pipeline
            .clone()
            .with_auth(AuthLayer::new(auth.clone(), AuthMode::Optional, logger.clone())),
        None => pipeline.clone(),
    };

    let mut router = Router::new()
        .route(
            "/health",
            on_service(GET, pipeline.handler(endpoint(&state, handlers::health_check))),
        )
        .route(
            "/echo",
            on_service(POST, echo_pipeline.handler(endpoint(&state, handlers::echo))),
        );

    if let Some(auth) = caller {
        let me = pipeline
            .clone()
            .with_auth(AuthLayer::new(auth, AuthMode::Required, logger.clone()));
        router = router.route(
            "/me",
            on_service(GET, me.handler(endpoint(&state, handlers::me))),
        );
    }

    if let Some(jwt) = &state.jwt {
        let refresh = pipeline
            .clone()
            .with_auth(AuthLayer::required(JwtAuthenticator::refresh(jwt.clone()), logger.clone()));
        router = router.route(
            "/tokens/refresh",
            on_service(POST, refresh.handler(endpoint(&state, handlers::refresh_token))),
        );

        if let Some(basic) = &state.basic {
            let tokens = pipeline
                .clone()
                .with_auth(AuthLayer::required(basic.clone(), logger.clone()));
            router = router.route(
                "/tokens",
                on_service(POST, tokens.handler(endpoint(&state, handlers::issue_tokens))),
            );
            info!("Token issuance enabled");
        } else {
            info!("Token issuance disabled (no basic credentials configured)");
        }
    }

    router.fallback_service(pipeline.handler(handler_fn(|_req| async {
        Ok::<_, PipelineError>(StatusCode::NOT_FOUND.into_response())
    })))
}

/// Bind an application handler to the state.
fn endpoint<F, Fut>(state: &AppState, f: F) -> Handler
where
    F: Fn(AppState, Request<Body>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Body>, PipelineError>> + Send + 'static,
{
    let state = state.clone();
    handler_fn(move |req| f(state.clone(), req))
}

/// Access token or basic credentials, whichever are configured.
fn caller_authenticator(state: &AppState) -> Option<Arc<dyn Authenticator>> {
    match (&state.jwt, &state.basic) {
        (Some(jwt), Some(basic)) => Some(Arc::new(EitherAuthenticator::new(
            JwtAuthenticator::access(jwt.clone()),
            basic.clone(),
        ))),
        (Some(jwt), None) => Some(Arc::new(JwtAuthenticator::access(jwt.clone()))),
        (None, Some(basic)) => Some(basic.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::logger::MemoryLogger;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_route_is_not_found_with_request_id() {
        let state = AppState::new(Config::default(), MemoryLogger::new());
        let app = build_router(state.clone());

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_token_routes_absent_without_secret() {
        let state = AppState::new(Config::default(), MemoryLogger::new());
        let app = build_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tokens")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        state.shutdown().await;
    }
}

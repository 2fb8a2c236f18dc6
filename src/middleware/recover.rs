//! Panic recovery.
//!
//! A panic raised while the inner service builds its future or while that
//! future is polled is caught here. The panic becomes a
//! [`PipelineError::Panic`] in the request context and the request continues
//! outward as a normal response. Nothing is re-raised.
//!
//! The stack is captured by a process-wide panic hook, installed once and
//! chained in front of the previous hook, which parks the backtrace of the
//! panicking frame in a thread-local. `catch_unwind` returns on the same
//! thread within the same poll, so the recovery path picks it up from there.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Once;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::FutureExt;
use tower::{Layer, Service};

use super::{ResponseFuture, reject};
use crate::context::{RequestContextExt, RequestContextHandle};
use crate::error::PipelineError;
use crate::logger::{Fields, SharedLogger};
use crate::metrics;

#[derive(Clone)]
pub struct RecoverLayer {
    logger: SharedLogger,
}

impl RecoverLayer {
    pub fn new(logger: SharedLogger) -> Self {
        install_stack_hook();
        Self { logger }
    }
}

thread_local! {
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static STACK_HOOK: Once = Once::new();

fn install_stack_hook() {
    STACK_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// Stack parked by the hook for the panic just caught on this thread.
fn take_panic_stack() -> String {
    PANIC_STACK
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RecoverService<S> {
    inner: S,
    logger: SharedLogger,
}

impl<S> Service<Request<Body>> for RecoverService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let ctx = req.request_context();
        let logger = self.logger.clone();

        let fut = match catch_unwind(AssertUnwindSafe(|| self.inner.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let response = recovered(ctx.as_ref(), &logger, payload.as_ref());
                return Box::pin(async move { Ok::<_, S::Error>(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(recovered(ctx.as_ref(), &logger, payload.as_ref())),
            }
        })
    }
}

fn recovered(
    ctx: Option<&RequestContextHandle>,
    logger: &SharedLogger,
    payload: &(dyn Any + Send),
) -> Response<Body> {
    let message = panic_message(payload);
    let stack = take_panic_stack();
    metrics::record_panic_recovered();

    let snapshot = ctx.map(|c| c.snapshot());
    logger.error(
        snapshot.as_ref(),
        "recovered from panic",
        Fields::new().with("panic", &message),
    );

    if let Some(ctx) = ctx {
        ctx.set_error_stack(stack);
    }
    reject(ctx, PipelineError::Panic { message })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

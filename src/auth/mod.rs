//! Request authenticators.
//!
//! An [`Authenticator`] inspects a request and either returns the caller's
//! [`Identity`] or an [`AuthError`]. Authenticators are plugged into the
//! chain through [`AuthLayer`](crate::middleware::AuthLayer).

pub mod basic;
pub mod jwt;

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::http::header::AUTHORIZATION;

use crate::error::AuthError;

pub use basic::BasicAuthenticator;
pub use jwt::{Claims, Jwt, JwtAuthenticator, JwtSettings, TokenType};

/// Error text when no credentials of the expected scheme are present.
pub const NO_TOKEN: &str = "no token present in request";

/// Who the caller is, as established by an [`Authenticator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity {
    /// Numeric user id, when the credentials carry one.
    pub user_id: Option<i64>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }
}

/// Authenticates a request.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, req: &Request<Body>) -> Result<Identity, AuthError>;
}

impl<A: Authenticator + ?Sized> Authenticator for Arc<A> {
    fn authenticate(&self, req: &Request<Body>) -> Result<Identity, AuthError> {
        (**self).authenticate(req)
    }
}

/// Tries `primary`, falling back to `secondary` when it fails.
///
/// When both fail the error carries both reasons.
#[derive(Debug, Clone)]
pub struct EitherAuthenticator<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> EitherAuthenticator<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: Authenticator, S: Authenticator> Authenticator for EitherAuthenticator<P, S> {
    fn authenticate(&self, req: &Request<Body>) -> Result<Identity, AuthError> {
        let primary_err = match self.primary.authenticate(req) {
            Ok(identity) => return Ok(identity),
            Err(e) => e,
        };
        self.secondary.authenticate(req).map_err(|secondary_err| {
            AuthError::new(format!(
                "invalid jwt: {}, invalid basic: {}",
                primary_err.reason(),
                secondary_err.reason()
            ))
        })
    }
}

/// Credentials following `scheme` in the `Authorization` header.
///
/// The scheme is matched case-insensitively.
pub(crate) fn authorization_credentials<'a, B>(req: &'a Request<B>, scheme: &str) -> Option<&'a str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (given, credentials) = value.split_once(' ')?;
    if !given.eq_ignore_ascii_case(scheme) {
        return None;
    }
    let credentials = credentials.trim();
    (!credentials.is_empty()).then_some(credentials)
}

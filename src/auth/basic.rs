//! HTTP Basic authentication against a single configured credential pair.

use axum::body::Body;
use axum::http::Request;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;

use super::{Authenticator, Identity, NO_TOKEN, authorization_credentials};
use crate::error::AuthError;

/// Accepts `Authorization: Basic <base64(username:password)>`.
#[derive(Clone)]
pub struct BasicAuthenticator {
    expected_token: String,
}

impl BasicAuthenticator {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            expected_token: STANDARD.encode(format!("{username}:{password}")),
        }
    }

    /// The header value a client must send.
    pub fn header_value(&self) -> String {
        format!("Basic {}", self.expected_token)
    }
}

// Never print the credential.
impl std::fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthenticator").finish_non_exhaustive()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, req: &Request<Body>) -> Result<Identity, AuthError> {
        let token = authorization_credentials(req, "Basic").ok_or_else(|| AuthError::new(NO_TOKEN))?;
        if constant_time_eq(token, &self.expected_token) {
            Ok(Identity::anonymous())
        } else {
            Err(AuthError::new("invalid token"))
        }
    }
}

/// Perform constant-time comparison of two strings.
///
/// Strings of different lengths compare unequal without inspecting content.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

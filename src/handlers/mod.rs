mod echo;
mod health;
mod tokens;

pub use echo::{EchoRequest, EchoResponse, echo};
pub use health::{HealthResponse, health_check};
pub use tokens::{MeResponse, TokenRequest, TokenResponse, issue_tokens, me, refresh_token};

/// Largest JSON body a handler reads.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

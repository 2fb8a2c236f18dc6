use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;
use thiserror::Error;

use crate::logger::Level;
use crate::validation::ValidationError;

/// Generic message for failures whose details must stay server-side.
pub const INTERNAL_ERROR_MESSAGE: &str = "Something went wrong, please try again later";

/// Authentication or authorization failure.
///
/// Produced by [`Authenticator`](crate::auth::Authenticator) implementations
/// and rendered as `401 Unauthorized`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unauthorized, Err: {reason}")]
pub struct AuthError {
    reason: String,
}

impl AuthError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The underlying reason, without the `Unauthorized` prefix.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Errors recorded into the request context by pipeline layers and handlers.
///
/// Lower layers never write error bodies themselves: they store one of these
/// and the [`ErrorHandlerLayer`](crate::middleware::ErrorHandlerLayer) turns it
/// into the final response.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("panic: {message}")]
    Panic { message: String },

    #[error("rate limit exceeded")]
    AdmissionRejected { retry_after_secs: Option<u64> },

    /// Known, caught application failure with a caller-facing message.
    #[error("Message: {message}, Code: {code}")]
    Application { code: u16, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error response body shared by every error branch.
#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    message: &'a str,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl PipelineError {
    /// Create an application error with the given code and message.
    pub fn application(code: u16, message: impl Into<String>) -> Self {
        PipelineError::Application {
            code,
            message: message.into(),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Auth(_) => StatusCode::UNAUTHORIZED,
            PipelineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::Application { .. } => StatusCode::BAD_REQUEST,
            PipelineError::Panic { .. } | PipelineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable classification, used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Auth(_) => "auth_error",
            PipelineError::Validation(_) => "validation_error",
            PipelineError::Panic { .. } => "panic",
            PipelineError::AdmissionRejected { .. } => "admission_rejected",
            PipelineError::Application { .. } => "application_error",
            PipelineError::Internal(_) => "internal_error",
        }
    }

    /// Log level for a request that finished with this error.
    ///
    /// Client-caused outcomes are warnings; faults are errors.
    pub fn log_level(&self) -> Level {
        match self {
            PipelineError::Panic { .. } | PipelineError::Internal(_) => Level::Error,
            _ => Level::Warn,
        }
    }

    /// Render the response for this error without consuming it.
    ///
    /// Internal details (panic payloads, internal error chains) are never
    /// exposed to clients.
    pub fn to_response(&self) -> Response<Body> {
        let status = self.status_code();
        let (message, code, data) = match self {
            PipelineError::Auth(e) => ("Unauthorized".to_string(), 401, Some(e.to_string())),
            PipelineError::Validation(e) => (e.message(), 422, Some(e.to_string())),
            PipelineError::AdmissionRejected { .. } => {
                ("Rate limit exceeded".to_string(), 429, None)
            }
            PipelineError::Application { code, message } => {
                (message.clone(), *code, Some(self.to_string()))
            }
            PipelineError::Panic { .. } | PipelineError::Internal(_) => {
                (INTERNAL_ERROR_MESSAGE.to_string(), 500, None)
            }
        };

        let body = ErrorResponse {
            message: &message,
            code,
            data,
        };
        let encoded = serde_json::to_vec(&body)
            .unwrap_or_else(|_| br#"{"message":"Internal Server Error","code":500}"#.to_vec());

        let mut response = (status, encoded).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let PipelineError::AdmissionRejected {
            retry_after_secs: Some(secs),
        } = self
        {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(*secs));
        }
        response
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response<Body> {
        self.to_response()
    }
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{0}")]
    Inconsistent(String),
}

/// Convenience type alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
pub fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::validation::Validator;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_auth_error_maps_to_unauthorized() {
        let error = PipelineError::from(AuthError::new("invalid token"));
        let response = error.to_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Unauthorized");
        assert_eq!(body["code"], 401);
        assert_eq!(body["data"], "Unauthorized, Err: invalid token");
    }

    #[tokio::test]
    async fn test_validation_error_uses_first_field_message() {
        let error = Validator::new()
            .required("email", "")
            .min_len("password", "abc", 8)
            .finish()
            .unwrap_err();
        let response = PipelineError::from(error).to_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["message"], "email is required");
        assert_eq!(body["code"], 422);
    }

    #[tokio::test]
    async fn test_panic_does_not_leak_details() {
        let error = PipelineError::Panic {
            message: "index out of bounds in secret_module".to_string(),
        };
        let response = error.to_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], INTERNAL_ERROR_MESSAGE);
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_admission_rejected_sets_retry_after() {
        let error = PipelineError::AdmissionRejected {
            retry_after_secs: Some(3),
        };
        let response = error.to_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn test_admission_rejected_without_refill_has_no_retry_after() {
        let error = PipelineError::AdmissionRejected {
            retry_after_secs: None,
        };
        assert!(error.to_response().headers().get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_application_error_is_bad_request() {
        let error = PipelineError::application(1001, "Email already registered");
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.kind(), "application_error");
        assert_eq!(error.log_level(), Level::Warn);
    }

    #[test]
    fn test_internal_error_logs_at_error_level() {
        let error = PipelineError::from(anyhow::anyhow!("db down"));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.log_level(), Level::Error);
    }

    #[test]
    fn test_sanitize_missing_field() {
        let err = serde_json::from_str::<std::collections::HashMap<String, String>>("{").unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Malformed JSON in request body");

        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Login {
            email: String,
        }
        let err = serde_json::from_str::<Login>("{}").unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Missing required field: email");
    }
}

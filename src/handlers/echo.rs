//! `POST /echo` - Returns a validated message with the caller's request context.

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::MAX_BODY_BYTES;
use crate::context::RequestContextExt;
use crate::error::PipelineError;
use crate::state::AppState;
use crate::validation::{Validate, ValidationError, Validator, validated_json_body};

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_LEN: usize = 1024;

#[derive(Debug, Deserialize)]
pub struct EchoRequest {
    pub message: String,
    /// Carried through untouched; a common redaction target.
    #[serde(default)]
    pub secret: Option<String>,
}

impl Validate for EchoRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        Validator::new()
            .required("message", &self.message)
            .max_len("message", &self.message, MAX_MESSAGE_LEN)
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct EchoResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub request_id: Option<String>,
    pub user_id: Option<i64>,
    pub idempotency_key: Option<String>,
}

pub async fn echo(_state: AppState, req: Request<Body>) -> Result<Response<Body>, PipelineError> {
    let snapshot = req.context_snapshot().unwrap_or_default();
    let body: EchoRequest = validated_json_body(req.into_body(), MAX_BODY_BYTES).await?;

    Ok(Json(EchoResponse {
        message: body.message,
        secret: body.secret,
        request_id: Some(snapshot.request_id).filter(|id| !id.is_empty()),
        user_id: snapshot.user_id,
        idempotency_key: snapshot.idempotency_key,
    })
    .into_response())
}

//! Token issuance.
//!
//! - `POST /tokens` - Basic-authenticated; issues an access/refresh pair for a subject
//! - `POST /tokens/refresh` - Refresh-token-authenticated; issues a new access token
//! - `GET /me` - Who the caller is

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::MAX_BODY_BYTES;
use crate::auth::{Identity, Jwt, TokenType};
use crate::context::RequestContextExt;
use crate::error::PipelineError;
use crate::state::AppState;
use crate::validation::{Validate, ValidationError, Validator, validated_json_body};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Numeric user id the tokens are issued for
    pub subject: String,
}

impl Validate for TokenRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        Validator::new()
            .required("subject", &self.subject)
            .rule("subject", self.subject.parse::<i64>().is_ok(), "numeric")
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: Option<i64>,
    pub request_id: Option<String>,
}

fn jwt(state: &AppState) -> Result<&Jwt, PipelineError> {
    state
        .jwt
        .as_deref()
        .ok_or_else(|| PipelineError::application(400, "token issuance is not configured"))
}

fn access_response(jwt: &Jwt, access_token: String, refresh_token: Option<String>) -> Response<Body> {
    Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: jwt.settings().access_token_ttl.as_secs(),
    })
    .into_response()
}

pub async fn issue_tokens(
    state: AppState,
    req: Request<Body>,
) -> Result<Response<Body>, PipelineError> {
    let jwt = jwt(&state)?;
    let body: TokenRequest = validated_json_body(req.into_body(), MAX_BODY_BYTES).await?;

    let access = jwt.issue(&body.subject, TokenType::Access)?;
    let refresh = jwt.issue(&body.subject, TokenType::Refresh)?;
    Ok(access_response(jwt, access, Some(refresh)))
}

pub async fn refresh_token(
    state: AppState,
    req: Request<Body>,
) -> Result<Response<Body>, PipelineError> {
    let jwt = jwt(&state)?;
    let subject = req
        .extensions()
        .get::<Identity>()
        .and_then(|identity| identity.user_id)
        .ok_or_else(|| PipelineError::application(400, "refresh token carries no user id"))?;

    let access = jwt.issue(&subject.to_string(), TokenType::Access)?;
    Ok(access_response(jwt, access, None))
}

pub async fn me(_state: AppState, req: Request<Body>) -> Result<Response<Body>, PipelineError> {
    let snapshot = req.context_snapshot();
    Ok(Json(MeResponse {
        user_id: snapshot.as_ref().and_then(|s| s.user_id),
        request_id: snapshot.map(|s| s.request_id),
    })
    .into_response())
}

//! HMAC-signed bearer tokens.
//!
//! Tokens are HS512 JWTs carrying the registered claims plus a `token_type`
//! claim, so an access token can never be replayed where a refresh token is
//! expected and vice versa.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::http::Request;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{Authenticator, Identity, NO_TOKEN, authorization_credentials};
use crate::error::AuthError;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Purpose of a token, stored in its `token_type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    #[serde(rename = "AccessToken")]
    Access,
    #[serde(rename = "RefreshToken")]
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "AccessToken",
            TokenType::Refresh => "RefreshToken",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub token_type: TokenType,
}

/// Issuer, audiences and lifetimes for issued tokens.
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub issuer: String,
    pub audiences: Vec<String>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            issuer: "request_pipeline".to_string(),
            audiences: Vec::new(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Token issuer and verifier sharing one HMAC secret.
#[derive(Clone)]
pub struct Jwt {
    settings: JwtSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for Jwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwt")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Jwt {
    pub fn new(secret: &[u8], settings: JwtSettings) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[settings.issuer.as_str()]);
        if settings.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&settings.audiences);
        }
        validation.validate_nbf = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            settings,
        }
    }

    pub fn settings(&self) -> &JwtSettings {
        &self.settings
    }

    /// Sign a new token for `subject`.
    pub fn issue(&self, subject: &str, token_type: TokenType) -> anyhow::Result<String> {
        let ttl = match token_type {
            TokenType::Access => self.settings.access_token_ttl,
            TokenType::Refresh => self.settings.refresh_token_ttl,
        };
        let now = chrono::Utc::now().timestamp();
        let lifetime = i64::try_from(ttl.as_secs()).context("token lifetime out of range")?;

        let claims = Claims {
            iss: self.settings.issuer.clone(),
            sub: subject.to_string(),
            aud: self.settings.audiences.clone(),
            exp: now.saturating_add(lifetime),
            nbf: now,
            iat: now,
            token_type,
        };

        jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .with_context(|| format!("failed to encode {} token", token_type.label()))
    }

    /// Verify signature, issuer, audience, validity window and token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::new(format!("cannot parse token: {e}")))?;
        if data.claims.token_type != expected {
            return Err(AuthError::new("invalid token"));
        }
        Ok(data.claims)
    }
}

/// Accepts `Authorization: Bearer <jwt>` of a given [`TokenType`].
///
/// A numeric `sub` claim becomes the identity's user id.
#[derive(Debug, Clone)]
pub struct JwtAuthenticator {
    jwt: Arc<Jwt>,
    token_type: TokenType,
}

impl JwtAuthenticator {
    pub fn new(jwt: Arc<Jwt>, token_type: TokenType) -> Self {
        Self { jwt, token_type }
    }

    pub fn access(jwt: Arc<Jwt>) -> Self {
        Self::new(jwt, TokenType::Access)
    }

    pub fn refresh(jwt: Arc<Jwt>) -> Self {
        Self::new(jwt, TokenType::Refresh)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, req: &Request<Body>) -> Result<Identity, AuthError> {
        let token = authorization_credentials(req, "Bearer").ok_or_else(|| AuthError::new(NO_TOKEN))?;
        let claims = self.jwt.verify(token, self.token_type).map_err(|e| {
            AuthError::new(format!("{}, invalid {} token", e.reason(), self.token_type.label()))
        })?;
        Ok(Identity {
            user_id: claims.sub.parse().ok(),
        })
    }
}

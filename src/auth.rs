//! Bearer ID-token verification.
//!
//! When `auth.audience` is set, every request except `/health` must carry
//! `Authorization: Bearer <id-token>`. Tokens are checked against Google's
//! `tokeninfo` endpoint: the reported `aud` must equal the configured
//! audience and `exp` must lie in the future. Rejections are `401` with the
//! standard error body.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,

    #[error("token rejected: {0}")]
    Rejected(String),

    #[error("token verification unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    aud: String,
    /// tokeninfo reports numbers as strings
    #[serde(default)]
    exp: Value,
    #[serde(default)]
    email: Option<String>,
}

/// Verified token claims.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    pub email: Option<String>,
    pub expires_at: i64,
}

/// Verifies Google-issued ID tokens for one audience.
pub struct IdTokenVerifier {
    http: reqwest::Client,
    audience: String,
    endpoint: String,
}

impl IdTokenVerifier {
    pub fn new(audience: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_endpoint(audience, GOOGLE_TOKENINFO_URL)
    }

    pub fn with_endpoint(
        audience: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            audience: audience.into(),
            endpoint: endpoint.into(),
        })
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(AuthError::Unavailable(format!("tokeninfo returned {}", status)));
        }
        if !status.is_success() {
            return Err(AuthError::Rejected("invalid token".to_string()));
        }

        let info: TokenInfo = resp
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        check_claims(&info, &self.audience, Utc::now().timestamp())
    }
}

fn check_claims(info: &TokenInfo, audience: &str, now: i64) -> Result<Claims, AuthError> {
    if info.aud != audience {
        return Err(AuthError::Rejected("audience mismatch".to_string()));
    }
    let exp = match &info.exp {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
    .ok_or_else(|| AuthError::Rejected("missing expiry".to_string()))?;
    if exp <= now {
        return Err(AuthError::Rejected("token expired".to_string()));
    }
    Ok(Claims {
        email: info.email.clone(),
        expires_at: exp,
    })
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn unauthorized(err: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": { "code": "unauthorized", "message": err.to_string() } })),
    )
        .into_response()
}

/// axum middleware rejecting requests without a valid ID token.
pub async fn require_id_token(
    State(verifier): State<Arc<IdTokenVerifier>>,
    req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(&req).map(str::to_owned);
    let result = match token {
        Some(token) => verifier.verify(&token).await,
        None => Err(AuthError::Missing),
    };
    match result {
        Ok(claims) => {
            tracing::debug!(email = ?claims.email, "request authenticated");
            next.run(req).await
        }
        Err(e) => {
            tracing::warn!(path = %req.uri().path(), error = %e, "request rejected");
            unauthorized(&e)
        }
    }
}

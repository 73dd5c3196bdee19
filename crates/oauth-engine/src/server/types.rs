//! Wire types for the protocol endpoints.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::issuer::IssuedAccessToken;
use crate::models::AccessToken;
use crate::scope;

/// Query of `GET /authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Set when the consent page sends the user back after a denial.
    pub error: Option<String>,
}

/// Form body of `POST /token`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Query of `GET /info`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoQuery {
    pub code: Option<String>,
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl From<&IssuedAccessToken> for TokenResponse {
    fn from(issued: &IssuedAccessToken) -> Self {
        Self {
            access_token: issued.bearer.clone(),
            token_type: "Bearer",
            expires_in: issued.token.expires_in,
            scope: scope::join(&issued.token.scopes),
            refresh_token: issued.token.refresh_token.clone(),
        }
    }
}

impl IntoResponse for TokenResponse {
    fn into_response(self) -> Response {
        no_store(Json(self).into_response())
    }
}

/// Token endpoint error body (RFC 6749 §5.2) plus the engine error kind.
#[derive(Debug, Clone, Serialize)]
pub struct TokenError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub error_description: String,
    pub kind: String,
}

impl TokenError {
    #[must_use]
    pub fn new(
        status: StatusCode,
        error: impl Into<String>,
        description: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self { status, error: error.into(), error_description: description.into(), kind: kind.into() }
    }

    /// Map an engine error onto the token endpoint's error vocabulary.
    #[must_use]
    pub fn from_engine(err: &EngineError) -> Self {
        let status = match err {
            EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngineError::ReplicationTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Storage(_) | EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.oauth_error(), err.to_string(), err.kind())
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", description, "invalid_input")
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        let status = self.status;
        no_store((status, Json(self)).into_response())
    }
}

/// `GET /info` response.
#[derive(Debug, Clone, Serialize)]
pub struct InfoResponse {
    pub client_id: String,
    pub user_name: String,
    pub user_uid: String,
    pub scope: String,
    pub redirect_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorize_token: Option<String>,
}

impl InfoResponse {
    #[must_use]
    pub fn new(token: &AccessToken, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            client_id: token.client_name.clone(),
            user_name: token.user_name.clone(),
            user_uid: token.user_uid.clone(),
            scope: scope::join(&token.scopes),
            redirect_uri: token.redirect_uri.clone(),
            expires_in: token.remaining_seconds(now),
            authorize_token: token.authorize_token.clone(),
        }
    }
}

/// Add the cache headers RFC 6749 §5.1 requires on token responses.
fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

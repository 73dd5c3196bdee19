//! HTTP handlers for the authorize, token, info and grant endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Form, OriginalUri, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::chain::{AuthorizeContext, Decision, error_redirect};
use super::state::AppState;
use super::types::{AuthorizeQuery, InfoQuery, InfoResponse, TokenError, TokenRequest, TokenResponse};
use crate::auth::bearer_token;
use crate::codec::pkce::CodeChallengeMethod;
use crate::consent::{GrantQuery, GrantSubmission};
use crate::error::{EngineError, OptionalExt};
use crate::issuer::PkceChallenge;
use crate::models::{Client, Grant};
use crate::redirect::{append_query, found};
use crate::scope;

// ─── Authorize Endpoint ──────────────────────────────────────────────────────

/// `GET /authorize`
///
/// Problems with the client or its redirect URI are reported to the browser;
/// every later failure is redirected back to the client.
pub async fn handle_authorize(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let Some(client_id) = query.client_id.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing client_id").into_response();
    };
    let client = match state.clients.get(client_id).await.optional() {
        Ok(Some(client)) => client,
        Ok(None) => return (StatusCode::BAD_REQUEST, "Unknown client_id").into_response(),
        Err(err) => {
            tracing::warn!(client = client_id, error = %err, "Client lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Client lookup failed").into_response();
        }
    };

    let redirect_uri = match query.redirect_uri.as_deref() {
        Some(requested) if client.allows_redirect(requested) => requested.to_owned(),
        Some(_) => {
            return (StatusCode::BAD_REQUEST, "redirect_uri not registered for this client").into_response();
        }
        None => match client.redirect_uris.as_slice() {
            [only] => only.clone(),
            _ => return (StatusCode::BAD_REQUEST, "Missing redirect_uri").into_response(),
        },
    };
    let oauth_state = query.state.clone().unwrap_or_default();

    if query.response_type.as_deref() != Some("code") {
        return error_redirect(&redirect_uri, "unsupported_response_type", &oauth_state);
    }
    let pkce = match pkce_challenge(&query) {
        Ok(pkce) => pkce,
        Err(err) => {
            tracing::debug!(client = client_id, error = %err, "Rejected PKCE parameters");
            return error_redirect(&redirect_uri, authorize_error(&err), &oauth_state);
        }
    };

    let grant = Grant {
        client: client.id().to_owned(),
        scope: scope::normalize(query.scope.as_deref().unwrap_or_default()),
        redirect_uri,
    };
    let request_uri = uri.path_and_query().map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned());
    let mut ctx = AuthorizeContext {
        headers: &headers,
        request_uri,
        client,
        grant,
        state: oauth_state,
        error: query.error.clone(),
        user: None,
    };

    for handler in &state.authorize_chain {
        match handler.handle(&mut ctx).await {
            Ok(Decision::Continue) => {}
            Ok(Decision::Respond(response)) => return response,
            Err(err) => {
                tracing::warn!(client = %ctx.grant.client, error = %err, "Authorize handler failed");
                return error_redirect(&ctx.grant.redirect_uri, authorize_error(&err), &ctx.state);
            }
        }
    }

    let Some(user) = ctx.user.as_ref() else {
        return error_redirect(&ctx.grant.redirect_uri, "access_denied", &ctx.state);
    };
    match state.issuer.issue_authorize_token(user, &ctx.grant, &ctx.state, pkce).await {
        Ok(issued) => {
            let mut pairs = vec![("code", issued.code.as_str())];
            if !ctx.state.is_empty() {
                pairs.push(("state", ctx.state.as_str()));
            }
            found(&append_query(&ctx.grant.redirect_uri, &pairs))
        }
        Err(err) => {
            tracing::warn!(client = %ctx.grant.client, error = %err, "Could not issue authorize token");
            error_redirect(&ctx.grant.redirect_uri, authorize_error(&err), &ctx.state)
        }
    }
}

/// Error code for an authorization response (RFC 6749 §4.1.2.1).
fn authorize_error(err: &EngineError) -> &'static str {
    match err {
        EngineError::InvalidInput { .. } => "invalid_request",
        EngineError::AccessDenied(_) => "access_denied",
        EngineError::ReplicationTimeout { .. } => "temporarily_unavailable",
        _ => "server_error",
    }
}

/// PKCE parameters of an authorize request. A challenge without a method is
/// `plain` (RFC 7636 §4.3).
fn pkce_challenge(query: &AuthorizeQuery) -> Result<Option<PkceChallenge>, EngineError> {
    match (query.code_challenge.as_deref(), query.code_challenge_method.as_deref()) {
        (None | Some(""), None) => Ok(None),
        (None | Some(""), Some(_)) => {
            Err(EngineError::invalid_input("code_challenge", "code_challenge_method given without a challenge"))
        }
        (Some(challenge), method) => {
            let method = match method {
                Some(m) => m
                    .parse::<CodeChallengeMethod>()
                    .map_err(|e| EngineError::invalid_input("code_challenge_method", e))?,
                None => CodeChallengeMethod::Plain,
            };
            Ok(Some(PkceChallenge { challenge: challenge.to_owned(), method }))
        }
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /token`
pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TokenRequest>,
) -> Response {
    let client = match authenticate_client(&state, &headers, &form).await {
        Ok(client) => client,
        Err(err) => return err.into_response(),
    };

    if form.grant_type == "authorization_code" {
        return handle_authorization_code_grant(&state, &client, &form).await;
    }

    for handler in &state.access_chain {
        match handler.handle(&form, &client).await {
            Ok(Decision::Continue) => {}
            Ok(Decision::Respond(response)) => return response,
            Err(err) => return TokenError::from_engine(&err).into_response(),
        }
    }
    TokenError::new(
        StatusCode::BAD_REQUEST,
        "unsupported_grant_type",
        "no handler accepted the grant",
        "unsupported_grant_type",
    )
    .into_response()
}

async fn handle_authorization_code_grant(state: &AppState, client: &Client, form: &TokenRequest) -> Response {
    let Some(code) = form.code.as_deref() else {
        return TokenError::invalid_request("Missing code").into_response();
    };

    match state
        .issuer
        .exchange_authorize_token(code, client.id(), form.redirect_uri.as_deref(), form.code_verifier.as_deref())
        .await
    {
        Ok(issued) => TokenResponse::from(&issued).into_response(),
        Err(err) => {
            tracing::warn!(client = %client.id(), error = %err, "Authorization code exchange failed");
            TokenError::from_engine(&err).into_response()
        }
    }
}

/// Resolve and authenticate the client from HTTP Basic credentials or the
/// `client_id`/`client_secret` form fields.
async fn authenticate_client(state: &AppState, headers: &HeaderMap, form: &TokenRequest) -> Result<Client, TokenError> {
    let (client_id, secret) = match basic_credentials(headers) {
        Some((id, secret)) => {
            if form.client_id.as_deref().is_some_and(|form_id| form_id != id) {
                return Err(TokenError::invalid_request("client_id does not match the Authorization header"));
            }
            (id, Some(secret))
        }
        None => match form.client_id.clone() {
            Some(id) => (id, form.client_secret.clone()),
            None => return Err(TokenError::from_engine(&EngineError::Unauthenticated)),
        },
    };

    let client = match state.clients.get(&client_id).await.optional() {
        Ok(Some(client)) => client,
        Ok(None) => {
            tracing::warn!(client = %client_id, "Token request from unknown client");
            return Err(TokenError::from_engine(&EngineError::Unauthenticated));
        }
        Err(err) => return Err(TokenError::from_engine(&err)),
    };
    if !client.check_secret(secret.as_deref()) {
        tracing::warn!(client = %client_id, "Client secret rejected");
        return Err(TokenError::from_engine(&EngineError::Unauthenticated));
    }
    Ok(client)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_owned(), secret.to_owned()))
}

// ─── Info Endpoint ───────────────────────────────────────────────────────────

/// `GET /info`
pub async fn handle_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<InfoQuery>,
) -> Response {
    let Some(bearer) = bearer_token(&headers).map(str::to_owned).or(query.code) else {
        return TokenError::invalid_request("Missing access token").into_response();
    };

    match state.issuer.lookup_access_token(&bearer).await {
        Ok((token, _)) => Json(InfoResponse::new(&token, chrono::Utc::now())).into_response(),
        Err(err @ (EngineError::Storage(_) | EngineError::Serialization(_))) => {
            TokenError::from_engine(&err).into_response()
        }
        Err(err) => {
            TokenError::new(StatusCode::UNAUTHORIZED, "invalid_token", err.to_string(), err.kind()).into_response()
        }
    }
}

// ─── Grant Endpoint ──────────────────────────────────────────────────────────

/// `GET /grant`
pub async fn handle_grant_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<GrantQuery>,
) -> Response {
    state.grant.handle_get(&headers, jar, query).await
}

/// `POST /grant`
pub async fn handle_grant_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<GrantSubmission>,
) -> Response {
    state.grant.handle_post(&headers, jar, form).await
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "oauth-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

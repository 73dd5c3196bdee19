//! Ordered handler chains behind `/authorize` and `/token`.
//!
//! Each handler either lets the request continue to the next one or
//! answers it. The authorize chain ends by issuing a code; the access chain
//! ends in [`DenyAccessHandler`].

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use super::types::{TokenError, TokenRequest};
use crate::auth::RequestAuthenticator;
use crate::consent::{render_message_page, save_client_authorization};
use crate::error::{EngineError, EngineResult};
use crate::models::{Client, ClientAuthorization, Grant, GrantMethod, UserInfo};
use crate::redirect::{append_query, found};
use crate::registry::Registry;
use crate::scope;
use crate::validation::ClientAuthorizationGrantChecker;

/// Outcome of one handler.
#[derive(Debug)]
pub enum Decision {
    Continue,
    Respond(Response),
}

/// Everything known about an authorize request while the chain runs.
#[derive(Debug)]
pub struct AuthorizeContext<'a> {
    pub headers: &'a HeaderMap,
    /// Path and query of this request, used as the `then` target.
    pub request_uri: String,
    pub client: Client,
    pub grant: Grant,
    pub state: String,
    /// `error` parameter echoed back by the consent page.
    pub error: Option<String>,
    /// Set by [`AuthorizeAuthenticator`].
    pub user: Option<UserInfo>,
}

#[async_trait::async_trait]
pub trait AuthorizeHandler: Send + Sync {
    async fn handle(&self, ctx: &mut AuthorizeContext<'_>) -> EngineResult<Decision>;
}

/// Authenticates the resource owner, or sends them to log in.
pub struct AuthorizeAuthenticator {
    authenticator: Arc<dyn RequestAuthenticator>,
    login_url: Option<String>,
}

impl AuthorizeAuthenticator {
    #[must_use]
    pub fn new(authenticator: Arc<dyn RequestAuthenticator>, login_url: Option<String>) -> Self {
        Self { authenticator, login_url }
    }
}

#[async_trait::async_trait]
impl AuthorizeHandler for AuthorizeAuthenticator {
    async fn handle(&self, ctx: &mut AuthorizeContext<'_>) -> EngineResult<Decision> {
        match self.authenticator.authenticate(ctx.headers).await {
            Ok(Some(user)) => {
                ctx.user = Some(user);
                return Ok(Decision::Continue);
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "Authorize request failed authentication"),
        }

        Ok(Decision::Respond(match &self.login_url {
            Some(login) => found(&append_query(login, &[("then", ctx.request_uri.as_str())])),
            None => (
                StatusCode::UNAUTHORIZED,
                Html(render_message_page("Login Required", "You must be logged in to authorize this client.")),
            )
                .into_response(),
        }))
    }
}

/// Decides whether the authenticated user has approved the request.
pub struct GrantCheck {
    checker: ClientAuthorizationGrantChecker,
    authorizations: Arc<dyn Registry<ClientAuthorization>>,
    default_method: GrantMethod,
    grant_path: String,
    conflict_retries: usize,
}

impl GrantCheck {
    #[must_use]
    pub fn new(
        authorizations: Arc<dyn Registry<ClientAuthorization>>,
        default_method: GrantMethod,
        grant_path: impl Into<String>,
        conflict_retries: usize,
    ) -> Self {
        Self {
            checker: ClientAuthorizationGrantChecker::new(Arc::clone(&authorizations)),
            authorizations,
            default_method,
            grant_path: grant_path.into(),
            conflict_retries,
        }
    }
}

#[async_trait::async_trait]
impl AuthorizeHandler for GrantCheck {
    async fn handle(&self, ctx: &mut AuthorizeContext<'_>) -> EngineResult<Decision> {
        if ctx.error.as_deref() == Some("access_denied") {
            return Ok(Decision::Respond(error_redirect(
                &ctx.grant.redirect_uri,
                "access_denied",
                &ctx.state,
            )));
        }

        let Some(user) = ctx.user.as_ref() else {
            return Err(EngineError::Unauthenticated);
        };

        // A record held by another UID of the same name is an error, never a re-prompt.
        if self.checker.has_authorized_client(user, &ctx.grant).await? {
            return Ok(Decision::Continue);
        }

        match ctx.client.grant_method.unwrap_or(self.default_method) {
            GrantMethod::Auto => {
                let scopes = scope::split(&ctx.grant.scope);
                save_client_authorization(
                    self.authorizations.as_ref(),
                    user,
                    &ctx.grant.client,
                    &scopes,
                    self.conflict_retries,
                )
                .await?;
                tracing::info!(user = %user.name, client = %ctx.grant.client, "Auto-approved grant");
                Ok(Decision::Continue)
            }
            GrantMethod::Prompt => Ok(Decision::Respond(found(&append_query(
                &self.grant_path,
                &[
                    ("then", ctx.request_uri.as_str()),
                    ("client_id", ctx.grant.client.as_str()),
                    ("scopes", ctx.grant.scope.as_str()),
                    ("redirect_uri", ctx.grant.redirect_uri.as_str()),
                ],
            )))),
            GrantMethod::Deny => {
                tracing::info!(user = %user.name, client = %ctx.grant.client, "Grant denied by client policy");
                Ok(Decision::Respond(error_redirect(&ctx.grant.redirect_uri, "access_denied", &ctx.state)))
            }
        }
    }
}

/// Handles one or more non-`authorization_code` grant types.
#[async_trait::async_trait]
pub trait AccessHandler: Send + Sync {
    async fn handle(&self, request: &TokenRequest, client: &Client) -> EngineResult<Decision>;
}

/// Terminal access handler: rejects every grant type that reached it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAccessHandler;

#[async_trait::async_trait]
impl AccessHandler for DenyAccessHandler {
    async fn handle(&self, request: &TokenRequest, _client: &Client) -> EngineResult<Decision> {
        Ok(Decision::Respond(
            TokenError::new(
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                format!("grant type '{}' is not supported", request.grant_type),
                "unsupported_grant_type",
            )
            .into_response(),
        ))
    }
}

/// Redirect an OAuth error back to the client (RFC 6749 §4.1.2.1).
pub fn error_redirect(redirect_uri: &str, error: &str, state: &str) -> Response {
    let mut pairs = vec![("error", error)];
    if !state.is_empty() {
        pairs.push(("state", state));
    }
    found(&append_query(redirect_uri, &pairs))
}

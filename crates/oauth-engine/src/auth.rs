//! Request authentication and user resolution.
//!
//! The engine does not speak any identity-provider protocol. Identity
//! arrives either from an authenticating proxy (request headers) or as a
//! bearer token previously issued by the engine.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult, OptionalExt};
use crate::issuer::TokenIssuer;
use crate::models::UserInfo;

/// Default header carrying the user name.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Default header carrying the user UID.
pub const REMOTE_USER_UID_HEADER: &str = "x-remote-user-uid";

/// Default header carrying group names (repeatable).
pub const REMOTE_GROUP_HEADER: &str = "x-remote-group";

/// Resolves the user name a token was issued to into the current identity.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// [`EngineError::NotFound`] when the user does not exist.
    async fn get_user(&self, name: &str) -> EngineResult<UserInfo>;
}

/// [`UserDirectory`] backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserInfo>>,
}

impl InMemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = UserInfo>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.name.clone(), u)).collect()),
        }
    }

    /// Insert or replace a user. Replacing with a new UID models recreation.
    pub async fn upsert(&self, user: UserInfo) {
        self.users.write().await.insert(user.name.clone(), user);
    }

    pub async fn remove(&self, name: &str) -> Option<UserInfo> {
        self.users.write().await.remove(name)
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, name: &str) -> EngineResult<UserInfo> {
        self.users
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::not_found("user", name))
    }
}

/// Turns request headers into an identity.
#[async_trait::async_trait]
pub trait RequestAuthenticator: Send + Sync {
    /// `Ok(None)` when the request carries no credentials this
    /// authenticator understands.
    async fn authenticate(&self, headers: &HeaderMap) -> EngineResult<Option<UserInfo>>;
}

/// Trusts identity headers set by an authenticating proxy.
pub struct RequestHeaderAuthenticator {
    name_headers: Vec<HeaderName>,
    uid_headers: Vec<HeaderName>,
    group_headers: Vec<HeaderName>,
    users: Option<Arc<dyn UserDirectory>>,
}

impl RequestHeaderAuthenticator {
    /// Authenticator reading the default `X-Remote-*` headers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name_headers: vec![HeaderName::from_static(REMOTE_USER_HEADER)],
            uid_headers: vec![HeaderName::from_static(REMOTE_USER_UID_HEADER)],
            group_headers: vec![HeaderName::from_static(REMOTE_GROUP_HEADER)],
            users: None,
        }
    }

    /// Override the headers consulted, in priority order.
    #[must_use]
    pub fn with_headers(
        mut self,
        name_headers: Vec<HeaderName>,
        uid_headers: Vec<HeaderName>,
        group_headers: Vec<HeaderName>,
    ) -> Self {
        self.name_headers = name_headers;
        self.uid_headers = uid_headers;
        self.group_headers = group_headers;
        self
    }

    /// Resolve the UID from `users` when the proxy sends none.
    #[must_use]
    pub fn with_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }
}

impl Default for RequestHeaderAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestHeaderAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHeaderAuthenticator")
            .field("name_headers", &self.name_headers)
            .field("uid_headers", &self.uid_headers)
            .field("group_headers", &self.group_headers)
            .finish_non_exhaustive()
    }
}

fn first_header<'a>(headers: &'a HeaderMap, names: &[HeaderName]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim))
        .filter(|value| !value.is_empty())
}

#[async_trait::async_trait]
impl RequestAuthenticator for RequestHeaderAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> EngineResult<Option<UserInfo>> {
        let Some(name) = first_header(headers, &self.name_headers) else {
            return Ok(None);
        };

        let groups: Vec<String> = self
            .group_headers
            .iter()
            .flat_map(|header| headers.get_all(header))
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_owned)
            .collect();

        let uid = match (first_header(headers, &self.uid_headers), &self.users) {
            (Some(uid), _) => uid.to_owned(),
            (None, Some(users)) => match users.get_user(name).await.optional()? {
                Some(user) => user.uid,
                None => {
                    tracing::warn!(user = name, "Proxy-authenticated user is unknown");
                    return Err(EngineError::Unauthenticated);
                }
            },
            (None, None) => name.to_owned(),
        };

        Ok(Some(UserInfo { name: name.to_owned(), uid, groups }))
    }
}

/// Extract the credential from an `Authorization: Bearer` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authenticates requests carrying a previously issued access token.
#[derive(Debug, Clone)]
pub struct BearerTokenAuthenticator {
    issuer: Arc<TokenIssuer>,
}

impl BearerTokenAuthenticator {
    #[must_use]
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait::async_trait]
impl RequestAuthenticator for BearerTokenAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> EngineResult<Option<UserInfo>> {
        let Some(token) = bearer_token(headers) else {
            return Ok(None);
        };
        let (_, user) = self.issuer.lookup_access_token(token).await?;
        Ok(Some(user))
    }
}

/// Tries authenticators in order; the first identity wins.
#[derive(Clone, Default)]
pub struct UnionAuthenticator {
    authenticators: Vec<Arc<dyn RequestAuthenticator>>,
}

impl UnionAuthenticator {
    #[must_use]
    pub fn new(authenticators: Vec<Arc<dyn RequestAuthenticator>>) -> Self {
        Self { authenticators }
    }
}

impl std::fmt::Debug for UnionAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionAuthenticator").field("len", &self.authenticators.len()).finish()
    }
}

#[async_trait::async_trait]
impl RequestAuthenticator for UnionAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> EngineResult<Option<UserInfo>> {
        let mut first_error = None;
        for authenticator in &self.authenticators {
            match authenticator.authenticate(headers).await {
                Ok(Some(user)) => return Ok(Some(user)),
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "Authenticator rejected request");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(None), Err)
    }
}

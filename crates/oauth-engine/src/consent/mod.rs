//! Consent (grant) flow.
//!
//! A GET renders an approve/deny form bound to a fresh CSRF token; the POST
//! checks the token and, on approval, records a [`ClientAuthorization`] for
//! the authenticated user. Either way the browser is sent back to `then`.
//! Approval is a set union over scopes with a deterministic record name, so
//! resubmitting the same form leaves the stored state unchanged.

mod csrf;
mod form;

pub use csrf::{CookieCsrf, CsrfProvider};
pub use form::{GrantForm, render_grant_page, render_message_page};

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::auth::RequestAuthenticator;
use crate::error::{EngineError, EngineResult, OptionalExt};
use crate::models::{Client, ClientAuthorization, Object, UserInfo, authorization_name};
use crate::redirect::{append_query, found};
use crate::registry::{Registry, retry_on_conflict};
use crate::scope;

/// Query of `GET /grant`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantQuery {
    #[serde(default)]
    pub then: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub scopes: String,
    #[serde(default)]
    pub redirect_uri: String,
}

/// Body of `POST /grant`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantSubmission {
    #[serde(default)]
    pub then: String,
    #[serde(default)]
    pub csrf: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub scopes: String,
    #[serde(default)]
    pub redirect_uri: String,
    pub approve: Option<String>,
    pub deny: Option<String>,
}

impl GrantSubmission {
    /// A form carrying both `approve` and `deny` counts as a denial.
    fn approved(&self) -> bool {
        self.approve.as_deref().is_some_and(|v| !v.is_empty()) && self.deny.is_none()
    }
}

/// Serves the consent page and records approvals.
pub struct GrantServer {
    authenticator: Arc<dyn RequestAuthenticator>,
    csrf: Arc<dyn CsrfProvider>,
    clients: Arc<dyn Registry<Client>>,
    authorizations: Arc<dyn Registry<ClientAuthorization>>,
    conflict_retries: usize,
    action: String,
}

impl GrantServer {
    /// `action` is the path the form posts back to.
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn RequestAuthenticator>,
        csrf: Arc<dyn CsrfProvider>,
        clients: Arc<dyn Registry<Client>>,
        authorizations: Arc<dyn Registry<ClientAuthorization>>,
        conflict_retries: usize,
        action: impl Into<String>,
    ) -> Self {
        Self { authenticator, csrf, clients, authorizations, conflict_retries, action: action.into() }
    }

    /// Render the consent form for the authenticated user.
    pub async fn handle_get(&self, headers: &HeaderMap, jar: CookieJar, query: GrantQuery) -> Response {
        let user = match self.authenticate(headers, &query.then).await {
            Ok(user) => user,
            Err(response) => return response,
        };

        match self.clients.get(&query.client_id).await.optional() {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(client = %query.client_id, "Consent requested for unknown client");
                return message("Error", &format!("Client \"{}\" could not be found.", query.client_id));
            }
            Err(err) => {
                tracing::warn!(client = %query.client_id, error = %err, "Client lookup failed");
                return message("Error", "The client could not be loaded.");
            }
        }

        let (jar, csrf) = self.csrf.generate(jar);
        let form = GrantForm {
            then: query.then,
            csrf,
            client_id: query.client_id,
            user_name: user.name,
            scopes: query.scopes,
            redirect_uri: query.redirect_uri,
        };
        (jar, Html(render_grant_page(&self.action, &form))).into_response()
    }

    /// Apply an approve/deny decision.
    pub async fn handle_post(&self, headers: &HeaderMap, jar: CookieJar, form: GrantSubmission) -> Response {
        let user = match self.authenticate(headers, &form.then).await {
            Ok(user) => user,
            Err(response) => return response,
        };

        if !self.csrf.check(&jar, &form.csrf) {
            tracing::warn!(user = %user.name, client = %form.client_id, "Consent CSRF token mismatch");
            return message("Error", &EngineError::CsrfMismatch.to_string());
        }
        if form.user_name != user.name {
            tracing::warn!(user = %user.name, submitted = %form.user_name, "Consent submitted for another user");
            return message("Error", "The consent form was issued to a different user.");
        }

        let scopes = scope::split(&form.scopes);
        if !form.approved() || scopes.is_empty() {
            tracing::info!(user = %user.name, client = %form.client_id, "Consent denied");
            if form.then.is_empty() {
                return message("Access Denied", "You denied the request. You may close this page.");
            }
            return found(&append_query(&form.then, &[("error", "access_denied")]));
        }

        if let Err(err) = self.clients.get(&form.client_id).await {
            tracing::warn!(client = %form.client_id, error = %err, "Consent approved for unavailable client");
            return message("Error", &format!("Client \"{}\" could not be found.", form.client_id));
        }

        match save_client_authorization(self.authorizations.as_ref(), &user, &form.client_id, &scopes, self.conflict_retries)
            .await
        {
            Ok(saved) => {
                tracing::info!(
                    user = %user.name,
                    client = %form.client_id,
                    scopes = %scope::join(&saved.scopes),
                    "Consent granted"
                );
            }
            Err(err) => {
                tracing::warn!(user = %user.name, client = %form.client_id, error = %err, "Could not save consent");
                return message("Error", "Your approval could not be saved. Please try again.");
            }
        }

        if form.then.is_empty() {
            return message("Access Approved", "Access was approved, but there is nowhere to redirect.");
        }
        found(&form.then)
    }

    async fn authenticate(&self, headers: &HeaderMap, then: &str) -> Result<UserInfo, Response> {
        match self.authenticator.authenticate(headers).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) | Err(_) if !then.is_empty() => Err(found(then)),
            Ok(None) => Err(message("Error", "You must be logged in to grant access.")),
            Err(err) => {
                tracing::debug!(error = %err, "Consent authentication failed");
                Err(message("Error", "You must be logged in to grant access."))
            }
        }
    }
}

impl std::fmt::Debug for GrantServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantServer")
            .field("conflict_retries", &self.conflict_retries)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// Create the user's authorization for `client_id`, or widen the existing one.
///
/// A record left by an earlier incarnation of the user (different UID) is
/// taken over with exactly `scopes`. Conflicts are retried `retries` times.
pub async fn save_client_authorization(
    authorizations: &dyn Registry<ClientAuthorization>,
    user: &UserInfo,
    client_id: &str,
    scopes: &[String],
    retries: usize,
) -> EngineResult<ClientAuthorization> {
    let name = authorization_name(&user.name, client_id)?;
    let name = name.as_str();

    retry_on_conflict(retries, move || async move {
        match authorizations.get(name).await.optional()? {
            None => {
                let fresh = ClientAuthorization::new(&user.name, &user.uid, client_id, scopes.to_vec())?;
                match authorizations.create(fresh).await {
                    Err(EngineError::AlreadyExists { .. }) => Err(EngineError::conflict(
                        ClientAuthorization::KIND,
                        name,
                        "created concurrently",
                    )),
                    other => other,
                }
            }
            Some(mut existing) => {
                if existing.user_uid == user.uid {
                    let merged = scope::add(&existing.scopes, scopes);
                    if merged == existing.scopes {
                        return Ok(existing);
                    }
                    existing.scopes = merged;
                } else {
                    existing.user_uid.clone_from(&user.uid);
                    existing.scopes = scope::add::<String, String>(&[], scopes);
                }
                authorizations.update(existing).await
            }
        }
    })
    .await
}

fn message(title: &str, text: &str) -> Response {
    Html(render_message_page(title, text)).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use axum::http::{HeaderValue, StatusCode, header};

    use super::*;
    use crate::auth::RequestHeaderAuthenticator;
    use crate::registry::{ListOptions, MemoryRegistry, WatchOptions, WatchStream};

    struct Fixture {
        server: GrantServer,
        authorizations: Arc<MemoryRegistry<ClientAuthorization>>,
    }

    async fn fixture() -> Fixture {
        let clients = Arc::new(MemoryRegistry::<Client>::new());
        clients.create(Client::new("acme", "", vec!["https://acme.example/cb".into()])).await.unwrap();
        let authorizations = Arc::new(MemoryRegistry::<ClientAuthorization>::new());
        let server = GrantServer::new(
            Arc::new(RequestHeaderAuthenticator::new()),
            Arc::new(CookieCsrf::new("csrf", false)),
            clients,
            authorizations.clone(),
            5,
            "/oauth/grant",
        );
        Fixture { server, authorizations }
    }

    fn as_alice() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-remote-user", HeaderValue::from_static("alice"));
        headers.insert("x-remote-user-uid", HeaderValue::from_static("uid-1"));
        headers
    }

    fn jar_with(token: &str) -> CookieJar {
        CookieJar::new().add(axum_extra::extract::cookie::Cookie::new("csrf", token.to_owned()))
    }

    fn submission(csrf: &str, scopes: &str) -> GrantSubmission {
        GrantSubmission {
            then: "/oauth/authorize?client_id=acme".into(),
            csrf: csrf.into(),
            client_id: "acme".into(),
            user_name: "alice".into(),
            scopes: scopes.into(),
            redirect_uri: "https://acme.example/cb".into(),
            approve: Some("true".into()),
            deny: None,
        }
    }

    fn location(response: &Response) -> &str {
        response.headers()[header::LOCATION].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_get_sets_csrf_cookie() {
        let f = fixture().await;
        let query = GrantQuery { client_id: "acme".into(), scopes: "read".into(), ..GrantQuery::default() };
        let response = f.server.handle_get(&as_alice(), CookieJar::new(), query).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("csrf="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_get_unknown_client_is_terminal_page() {
        let f = fixture().await;
        let query = GrantQuery { client_id: "ghost".into(), ..GrantQuery::default() };
        let response = f.server.handle_get(&as_alice(), CookieJar::new(), query).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_unauthenticated_redirects_to_then() {
        let f = fixture().await;
        let query = GrantQuery { then: "/login?then=x".into(), client_id: "acme".into(), ..GrantQuery::default() };
        let response = f.server.handle_get(&HeaderMap::new(), CookieJar::new(), query).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/login?then=x");
    }

    #[tokio::test]
    async fn test_approve_merges_scopes() {
        let f = fixture().await;
        let first = f.server.handle_post(&as_alice(), jar_with("t"), submission("t", "read write")).await;
        assert_eq!(first.status(), StatusCode::FOUND);
        assert_eq!(location(&first), "/oauth/authorize?client_id=acme");

        f.server.handle_post(&as_alice(), jar_with("t"), submission("t", "write admin")).await;
        let stored = f.authorizations.get("alice:acme").await.unwrap();
        assert_eq!(stored.scopes, vec!["admin", "read", "write"]);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let f = fixture().await;
        f.server.handle_post(&as_alice(), jar_with("t"), submission("t", "read")).await;
        let before = f.authorizations.get("alice:acme").await.unwrap();
        f.server.handle_post(&as_alice(), jar_with("t"), submission("t", "read")).await;
        assert_eq!(f.authorizations.get("alice:acme").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_csrf_mismatch_writes_nothing() {
        let f = fixture().await;
        let response = f.server.handle_post(&as_alice(), jar_with("real"), submission("forged", "read")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(f.authorizations.is_empty().await);
    }

    #[tokio::test]
    async fn test_user_mismatch_writes_nothing() {
        let f = fixture().await;
        let form = GrantSubmission { user_name: "bob".into(), ..submission("t", "read") };
        f.server.handle_post(&as_alice(), jar_with("t"), form).await;
        assert!(f.authorizations.is_empty().await);
    }

    #[tokio::test]
    async fn test_deny_redirects_with_marker() {
        let f = fixture().await;
        let form = GrantSubmission { approve: None, deny: Some("true".into()), ..submission("t", "read") };
        let response = f.server.handle_post(&as_alice(), jar_with("t"), form).await;
        assert_eq!(location(&response), "/oauth/authorize?client_id=acme&error=access_denied");
        assert!(f.authorizations.is_empty().await);

        let empty = f.server.handle_post(&as_alice(), jar_with("t"), submission("t", "")).await;
        assert!(location(&empty).ends_with("error=access_denied"));
        assert!(f.authorizations.is_empty().await);
    }

    #[tokio::test]
    async fn test_approve_without_then_renders_page() {
        let f = fixture().await;
        let form = GrantSubmission { then: String::new(), ..submission("t", "read") };
        let response = f.server.handle_post(&as_alice(), jar_with("t"), form).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(f.authorizations.len().await, 1);
    }

    /// Lands a competing write for the same user just before the first
    /// create or update that passes through.
    struct Contended {
        inner: MemoryRegistry<ClientAuthorization>,
        rival_scopes: Vec<String>,
        interfered: AtomicBool,
        attempts: AtomicUsize,
    }

    impl Contended {
        fn new(rival_scopes: &[&str]) -> Self {
            Self {
                inner: MemoryRegistry::new(),
                rival_scopes: rival_scopes.iter().map(ToString::to_string).collect(),
                interfered: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Registry<ClientAuthorization> for Contended {
        async fn get(&self, name: &str) -> EngineResult<ClientAuthorization> {
            self.inner.get(name).await
        }

        async fn list(&self, options: &ListOptions) -> EngineResult<Vec<ClientAuthorization>> {
            self.inner.list(options).await
        }

        async fn create(&self, object: ClientAuthorization) -> EngineResult<ClientAuthorization> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.interfered.swap(true, Ordering::SeqCst) {
                let rival = ClientAuthorization::new(
                    &object.user_name,
                    &object.user_uid,
                    &object.client_name,
                    self.rival_scopes.clone(),
                )?;
                self.inner.create(rival).await?;
            }
            self.inner.create(object).await
        }

        async fn update(&self, object: ClientAuthorization) -> EngineResult<ClientAuthorization> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.interfered.swap(true, Ordering::SeqCst) {
                let mut current = self.inner.get(object.name()).await?;
                current.scopes = scope::add(&current.scopes, &self.rival_scopes);
                self.inner.update(current).await?;
            }
            self.inner.update(object).await
        }

        async fn delete(&self, name: &str) -> EngineResult<ClientAuthorization> {
            self.inner.delete(name).await
        }

        async fn watch(&self, options: WatchOptions) -> EngineResult<WatchStream<ClientAuthorization>> {
            self.inner.watch(options).await
        }
    }

    fn alice() -> UserInfo {
        UserInfo::new("alice", "uid-1")
    }

    #[tokio::test]
    async fn test_concurrent_create_is_retried_as_merge() {
        let registry = Contended::new(&["write"]);
        let saved = save_client_authorization(&registry, &alice(), "acme", &["read".to_string()], 5).await.unwrap();

        assert_eq!(saved.scopes, vec!["read", "write"]);
        // Lost the create race, then merged into the rival record.
        assert_eq!(registry.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(registry.inner.len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_update_is_retried() {
        let registry = Contended::new(&["write"]);
        registry
            .inner
            .create(ClientAuthorization::new("alice", "uid-1", "acme", vec!["read".into()]).unwrap())
            .await
            .unwrap();

        let saved = save_client_authorization(&registry, &alice(), "acme", &["admin".to_string()], 5).await.unwrap();
        assert_eq!(saved.scopes, vec!["admin", "read", "write"]);
        assert_eq!(registry.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conflict_without_retries_is_surfaced() {
        let registry = Contended::new(&["write"]);
        let err = save_client_authorization(&registry, &alice(), "acme", &["read".to_string()], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(registry.inner.get("alice:acme").await.unwrap().scopes, vec!["write"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_approvals_keep_every_scope() {
        let registry = Arc::new(MemoryRegistry::<ClientAuthorization>::new());
        let approvals = [["read", "write"], ["write", "admin"]].map(|scopes| {
            let registry = Arc::clone(&registry);
            let scopes: Vec<String> = scopes.iter().map(ToString::to_string).collect();
            tokio::spawn(async move {
                save_client_authorization(registry.as_ref(), &alice(), "acme", &scopes, 5).await
            })
        });
        for approval in approvals {
            approval.await.unwrap().unwrap();
        }

        let stored = registry.get("alice:acme").await.unwrap();
        assert_eq!(stored.scopes, vec!["admin", "read", "write"]);
    }

    #[tokio::test]
    async fn test_form_with_approve_and_deny_is_denied() {
        let f = fixture().await;
        let form = GrantSubmission { deny: Some("true".into()), ..submission("t", "read") };
        let response = f.server.handle_post(&as_alice(), jar_with("t"), form).await;
        assert!(location(&response).ends_with("error=access_denied"));
        assert!(f.authorizations.is_empty().await);
    }

    #[tokio::test]
    async fn test_recreated_user_takes_over_authorization() {
        let registry = MemoryRegistry::<ClientAuthorization>::new();
        let old = UserInfo::new("alice", "uid-0");
        save_client_authorization(&registry, &old, "acme", &["admin".to_string()], 5).await.unwrap();

        let new = UserInfo::new("alice", "uid-1");
        let saved = save_client_authorization(&registry, &new, "acme", &["read".to_string()], 5).await.unwrap();
        assert_eq!(saved.user_uid, "uid-1");
        assert_eq!(saved.scopes, vec!["read"]);
    }
}

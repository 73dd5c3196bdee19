//! Shared state behind the HTTP handlers.

use std::sync::Arc;

use super::chain::{AccessHandler, AuthorizeAuthenticator, AuthorizeHandler, DenyAccessHandler, GrantCheck};
use crate::auth::RequestAuthenticator;
use crate::config::{Config, defaults};
use crate::consent::{CookieCsrf, GrantServer};
use crate::issuer::TokenIssuer;
use crate::models::Client;
use crate::registry::Registry;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub issuer: Arc<TokenIssuer>,
    pub clients: Arc<dyn Registry<Client>>,
    pub grant: GrantServer,
    pub authorize_chain: Vec<Box<dyn AuthorizeHandler>>,
    pub access_chain: Vec<Box<dyn AccessHandler>>,
}

impl AppState {
    /// Wire the default chains: authenticate, then check the grant; deny
    /// every grant type other than `authorization_code`.
    #[must_use]
    pub fn new(config: Config, issuer: Arc<TokenIssuer>, authenticator: Arc<dyn RequestAuthenticator>) -> Self {
        let registries = issuer.registries().clone();
        let grant_path = format!("{}/grant", normalize_prefix(&config.prefix));

        let grant = GrantServer::new(
            Arc::clone(&authenticator),
            Arc::new(CookieCsrf::new(defaults::CSRF_COOKIE, config.secure_cookies)),
            Arc::clone(&registries.clients),
            Arc::clone(&registries.authorizations),
            config.conflict_retries,
            grant_path.clone(),
        );

        let authorize_chain: Vec<Box<dyn AuthorizeHandler>> = vec![
            Box::new(AuthorizeAuthenticator::new(authenticator, config.login_url.clone())),
            Box::new(GrantCheck::new(
                Arc::clone(&registries.authorizations),
                config.default_grant_method,
                grant_path,
                config.conflict_retries,
            )),
        ];

        Self {
            clients: registries.clients,
            issuer,
            grant,
            authorize_chain,
            access_chain: vec![Box::new(DenyAccessHandler)],
            config,
        }
    }

    /// Insert access handlers ahead of the terminal deny handler.
    #[must_use]
    pub fn with_access_handlers(mut self, handlers: Vec<Box<dyn AccessHandler>>) -> Self {
        let at = self.access_chain.len().saturating_sub(1);
        self.access_chain.splice(at..at, handlers);
        self
    }
}

/// `""` or a path with one leading and no trailing slash.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() { String::new() } else { format!("/{trimmed}") }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("prefix", &self.config.prefix)
            .field("authorize_handlers", &self.authorize_chain.len())
            .field("access_handlers", &self.access_chain.len())
            .finish_non_exhaustive()
    }
}

//! Storage-facing contracts for tokens, clients and client authorizations.
//!
//! The engine consumes a generic key/value registry with optimistic
//! concurrency and watch. [`MemoryRegistry`] implements the contract in
//! process for tests and single-node deployments.

mod memory;

pub use memory::MemoryRegistry;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::EngineResult;
use crate::models::{AccessToken, AuthorizeToken, Client, ClientAuthorization, Object};

/// Kind of change delivered by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// One change to a record, at the registry version it was written.
#[derive(Debug, Clone)]
pub struct WatchEvent<T> {
    pub event_type: EventType,
    /// State after the change (for `Deleted`, the last state).
    pub object: Option<T>,
    pub version: u64,
}

/// Equality selectors over labels and fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub labels: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

impl ListOptions {
    #[must_use]
    pub fn field(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut options = Self::default();
        options.fields.insert(key.into(), value.into());
        options
    }

    #[must_use]
    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut options = Self::default();
        options.labels.insert(key.into(), value.into());
        options
    }

    /// True when every selector matches.
    #[must_use]
    pub fn matches<T: Object>(&self, object: &T) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| object.meta().labels.get(k).is_some_and(|actual| actual == v))
            && self.fields.iter().all(|(k, v)| object.field(k) == Some(v.as_str()))
    }
}

/// Where a watch starts and what it follows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Only events for this record name.
    pub name: Option<String>,
    /// Deliver events with a version strictly greater than this.
    pub since_version: u64,
}

impl WatchOptions {
    #[must_use]
    pub fn for_name(name: impl Into<String>, since_version: u64) -> Self {
        Self { name: Some(name.into()), since_version }
    }
}

/// Stream of watch events; an `Err` item ends the watch.
pub type WatchStream<T> = BoxStream<'static, EngineResult<WatchEvent<T>>>;

/// CRUD + watch over records of one kind, keyed by name.
#[async_trait::async_trait]
pub trait Registry<T: Object>: Send + Sync {
    /// Fetch a record; [`crate::EngineError::NotFound`] when absent.
    async fn get(&self, name: &str) -> EngineResult<T>;

    async fn list(&self, options: &ListOptions) -> EngineResult<Vec<T>>;

    /// Store a new record and return it with its assigned version.
    async fn create(&self, object: T) -> EngineResult<T>;

    /// Replace a record. The object's version must match the stored one,
    /// otherwise [`crate::EngineError::Conflict`].
    async fn update(&self, object: T) -> EngineResult<T>;

    /// Remove a record and return its last state.
    async fn delete(&self, name: &str) -> EngineResult<T>;

    async fn watch(&self, options: WatchOptions) -> EngineResult<WatchStream<T>>;
}

/// The four registries the engine works against.
#[derive(Clone)]
pub struct Registries {
    pub access_tokens: Arc<dyn Registry<AccessToken>>,
    pub authorize_tokens: Arc<dyn Registry<AuthorizeToken>>,
    pub clients: Arc<dyn Registry<Client>>,
    pub authorizations: Arc<dyn Registry<ClientAuthorization>>,
}

impl Registries {
    /// Fresh in-memory registries.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            access_tokens: Arc::new(MemoryRegistry::<AccessToken>::new()),
            authorize_tokens: Arc::new(MemoryRegistry::<AuthorizeToken>::new()),
            clients: Arc::new(MemoryRegistry::<Client>::new()),
            authorizations: Arc::new(MemoryRegistry::<ClientAuthorization>::new()),
        }
    }
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries").finish()
    }
}

/// Run `op`, retrying up to `retries` more times while it fails with a conflict.
pub async fn retry_on_conflict<T, F, Fut>(retries: usize, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < retries => {
                attempt += 1;
                tracing::debug!(attempt, error = %err, "Retrying after conflict");
            }
            result => return result,
        }
    }
}

/// Create `client`, or reconcile an existing client of the same id with it.
///
/// With `preserve_existing_redirects` any extra redirect URIs already on the
/// stored client are kept; with `preserve_existing_secret` a non-empty stored
/// secret wins. A stored grant method is kept when set.
pub async fn ensure_client(
    clients: &dyn Registry<Client>,
    client: Client,
    preserve_existing_redirects: bool,
    preserve_existing_secret: bool,
    retries: usize,
) -> EngineResult<Client> {
    match clients.create(client.clone()).await {
        Err(crate::EngineError::AlreadyExists { .. }) => {}
        other => return other,
    }

    retry_on_conflict(retries, || {
        let desired = client.clone();
        async move {
            let mut existing = clients.get(desired.id()).await?;

            if !preserve_existing_secret || existing.secret.is_empty() {
                existing.secret = desired.secret;
            }

            let mut redirects = desired.redirect_uris;
            if preserve_existing_redirects {
                for uri in &existing.redirect_uris {
                    if !redirects.contains(uri) {
                        redirects.push(uri.clone());
                    }
                }
            }
            existing.redirect_uris = redirects;

            if existing.grant_method.is_none() {
                existing.grant_method = desired.grant_method;
            }

            clients.update(existing).await
        }
    })
    .await
}

//! OAuth Engine
//!
//! Token issuance, consent and replication consistency for an OAuth
//! authorization server that stores its tokens in a watchable object registry.
//!
//! # Features
//!
//! - **Token codec**: `(user, secret)` to stored name and bearer string, with
//!   optional per-record salting so a leaked registry cannot mint bearers
//! - **Consent flow**: CSRF-protected approve/deny page that merges scopes
//!   into one authorization record per user and client
//! - **Quorum observer**: a new access token is released only after N of M
//!   replicas have seen it
//! - **Handler chains**: ordered authorize and access handlers behind axum routes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oauth_engine::auth::{InMemoryUserDirectory, RequestHeaderAuthenticator};
//! use oauth_engine::issuer::TokenIssuer;
//! use oauth_engine::observer::QuorumObserver;
//! use oauth_engine::registry::Registries;
//! use oauth_engine::server::{AppState, OAuthServer};
//! use oauth_engine::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let issuer = TokenIssuer::new(
//!         &config,
//!         Registries::in_memory(),
//!         Arc::new(InMemoryUserDirectory::new()),
//!         QuorumObserver::disabled(),
//!     );
//!     let state = AppState::new(config, Arc::new(issuer), Arc::new(RequestHeaderAuthenticator::new()));
//!     OAuthServer::new(state).run(([127, 0, 0, 1], 8080).into()).await
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod consent;
pub mod error;
pub mod issuer;
pub mod models;
pub mod observer;
pub mod redirect;
pub mod registry;
pub mod scope;
pub mod server;
pub mod validation;

pub use codec::TokenCodec;
pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use issuer::TokenIssuer;

//! HTTP protocol adapter.
//!
//! Mounts the OAuth endpoints under the configured prefix:
//! - `GET /authorize` runs the authorize chain and redirects with a code
//! - `POST /token` authenticates the client and exchanges the code
//! - `GET /info` describes a presented access token
//! - `GET|POST /grant` serves the consent page
//!
//! `GET /health` stays at the root.

pub mod chain;
pub mod handlers;
pub mod state;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the router for `state`.
pub fn create_router(state: Arc<AppState>) -> Router {
    let oauth = Router::new()
        .route("/authorize", get(handlers::handle_authorize))
        .route("/token", post(handlers::handle_token))
        .route("/info", get(handlers::handle_info))
        .route("/grant", get(handlers::handle_grant_get).post(handlers::handle_grant_post));

    let prefix = state::normalize_prefix(&state.config.prefix);
    let router = Router::new().route("/health", get(handlers::health_check));
    // `nest` rejects an empty or root path.
    let router = if prefix.is_empty() { router.merge(oauth) } else { router.nest(&prefix, oauth) };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// OAuth HTTP server.
pub struct OAuthServer {
    state: Arc<AppState>,
}

impl OAuthServer {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state: Arc::new(state) }
    }

    /// Serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error on bind or server failure.
    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let router = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server listening on http://{}", addr);
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for OAuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthServer").field("state", &self.state).finish()
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}

//! OAuth Engine - Entry Point
//!
//! Serves the OAuth endpoints over in-memory registries, optionally with
//! follower replicas that every new access token must reach.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use oauth_engine::auth::{
    BearerTokenAuthenticator, InMemoryUserDirectory, RequestAuthenticator, RequestHeaderAuthenticator,
    UnionAuthenticator,
};
use oauth_engine::config::{Config, defaults};
use oauth_engine::models::{AccessToken, AuthorizeToken, Client, ClientAuthorization, GrantMethod, UserInfo};
use oauth_engine::observer::{QuorumObserver, ReplicaBackend};
use oauth_engine::registry::{MemoryRegistry, Registries, ensure_client};
use oauth_engine::server::{AppState, OAuthServer};
use oauth_engine::TokenIssuer;

#[derive(Parser, Debug)]
#[command(name = "oauth-engine")]
#[command(about = "OAuth authorization server with consent and replicated token storage")]
#[command(version)]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "BIND_ADDR")]
    bind: IpAddr,

    /// HTTP server port
    #[arg(long, default_value = "8080", env = "PORT")]
    port: u16,

    /// Client registered at startup
    #[arg(long, default_value = "oauth-engine-cli", env = "OAUTH_CLIENT_ID")]
    client_id: String,

    /// Secret of the startup client (empty for a public client)
    #[arg(long, default_value = "", env = "OAUTH_CLIENT_SECRET")]
    client_secret: String,

    /// Redirect URIs of the startup client
    #[arg(long, env = "OAUTH_REDIRECT_URIS", value_delimiter = ',')]
    redirect_uri: Vec<String>,

    /// Grant method of the startup client (auto, prompt, deny)
    #[arg(long, env = "OAUTH_CLIENT_GRANT_METHOD")]
    grant_method: Option<GrantMethod>,

    /// Users known to the directory, as `name` or `name:uid`
    #[arg(long = "user", env = "OAUTH_USERS", value_delimiter = ',')]
    users: Vec<String>,

    /// In-memory follower replicas of the access token registry
    #[arg(long, default_value = "0", env = "OAUTH_REPLICAS")]
    replicas: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

fn parse_user(entry: &str) -> UserInfo {
    match entry.split_once(':') {
        Some((name, uid)) => UserInfo::new(name.trim(), uid.trim()),
        None => UserInfo::new(entry.trim(), uuid::Uuid::new_v4().to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), replicas = cli.replicas, "Starting OAuth engine");

    let config = Config::from_env()?;

    let access_tokens = Arc::new(MemoryRegistry::<AccessToken>::new());
    let authorize_tokens = Arc::new(MemoryRegistry::<AuthorizeToken>::new());
    Arc::clone(&access_tokens).start_expiry_task(defaults::EXPIRY_SWEEP_INTERVAL);
    Arc::clone(&authorize_tokens).start_expiry_task(defaults::EXPIRY_SWEEP_INTERVAL);

    let backends = if cli.replicas == 0 {
        vec![ReplicaBackend::new("primary", access_tokens.clone())]
    } else {
        (0..cli.replicas)
            .map(|i| {
                let replica = Arc::new(MemoryRegistry::<AccessToken>::new());
                Arc::clone(&replica).follow(access_tokens.clone());
                ReplicaBackend::new(format!("replica-{i}"), replica)
            })
            .collect()
    };
    let observer = QuorumObserver::new(backends, config.success_threshold, config.replica_timeout);
    tracing::info!(required = observer.required(), backends = observer.backends().len(), "Replication quorum");

    let registries = Registries {
        access_tokens,
        authorize_tokens,
        clients: Arc::new(MemoryRegistry::<Client>::new()),
        authorizations: Arc::new(MemoryRegistry::<ClientAuthorization>::new()),
    };

    let mut client = Client::new(&cli.client_id, &cli.client_secret, cli.redirect_uri.clone());
    if let Some(method) = cli.grant_method {
        client = client.with_grant_method(method);
    }
    let client = ensure_client(registries.clients.as_ref(), client, true, true, config.conflict_retries).await?;
    tracing::info!(client = %client.id(), redirect_uris = ?client.redirect_uris, "Registered client");

    let users = Arc::new(InMemoryUserDirectory::with_users(cli.users.iter().map(String::as_str).map(parse_user)));

    let issuer = Arc::new(TokenIssuer::new(&config, registries, users.clone(), observer));
    let authenticators: Vec<Arc<dyn RequestAuthenticator>> = vec![
        Arc::new(RequestHeaderAuthenticator::new().with_directory(users)),
        Arc::new(BearerTokenAuthenticator::new(Arc::clone(&issuer))),
    ];
    let state = AppState::new(config, issuer, Arc::new(UnionAuthenticator::new(authenticators)));

    OAuthServer::new(state).run(SocketAddr::new(cli.bind, cli.port)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        let user = parse_user("alice:uid-1");
        assert_eq!((user.name.as_str(), user.uid.as_str()), ("alice", "uid-1"));

        let user = parse_user("bob");
        assert_eq!(user.name, "bob");
        assert!(!user.uid.is_empty());
    }

    #[test]
    fn test_cli_parses_lists() {
        let cli = Cli::parse_from([
            "oauth-engine",
            "--redirect-uri",
            "https://a.example/cb,https://b.example/cb",
            "--user",
            "alice:1",
            "--grant-method",
            "auto",
        ]);
        assert_eq!(cli.redirect_uri.len(), 2);
        assert_eq!(cli.users, vec!["alice:1"]);
        assert_eq!(cli.grant_method, Some(GrantMethod::Auto));
    }
}

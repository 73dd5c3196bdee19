//! Quorum observation against independent in-memory replicas.

use std::sync::Arc;
use std::time::Duration;

use oauth_engine::auth::InMemoryUserDirectory;
use oauth_engine::config::Config;
use oauth_engine::models::{AccessToken, Client, Object, UserInfo};
use oauth_engine::observer::{QuorumObserver, ReplicaBackend};
use oauth_engine::registry::{MemoryRegistry, Registries, Registry};
use oauth_engine::{EngineError, TokenIssuer};

const TIMEOUT: Duration = Duration::from_millis(150);

fn backends(
    primary: &Arc<MemoryRegistry<Client>>,
) -> (Vec<ReplicaBackend<Client>>, Arc<MemoryRegistry<Client>>, Arc<MemoryRegistry<Client>>) {
    let b = Arc::new(MemoryRegistry::<Client>::new());
    let c = Arc::new(MemoryRegistry::<Client>::new());
    let list = vec![
        ReplicaBackend::new("replica-a", primary.clone()),
        ReplicaBackend::new("replica-b", b.clone()),
        ReplicaBackend::new("replica-c", c.clone()),
    ];
    (list, b, c)
}

#[tokio::test]
async fn test_one_of_three_meets_threshold_one() {
    let primary = Arc::new(MemoryRegistry::<Client>::new());
    let (list, _, _) = backends(&primary);
    let stored = primary.create(Client::new("acme", "", vec![])).await.unwrap();

    let observer = QuorumObserver::new(list, 1, TIMEOUT);
    observer.observe("acme", stored.resource_version()).await.unwrap();
}

#[tokio::test]
async fn test_one_of_three_fails_threshold_two_naming_silent_backends() {
    let primary = Arc::new(MemoryRegistry::<Client>::new());
    let (list, _, _) = backends(&primary);
    let stored = primary.create(Client::new("acme", "", vec![])).await.unwrap();

    let observer = QuorumObserver::new(list, 2, TIMEOUT);
    let err = observer.observe("acme", stored.resource_version()).await.unwrap_err();
    match err {
        EngineError::ReplicationTimeout { observed, required, failures } => {
            assert_eq!((observed, required), (1, 2));
            assert_eq!(
                failures,
                vec!["replica-b: timed out".to_string(), "replica-c: timed out".to_string()]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_followers_observe_upstream_writes() {
    let primary = Arc::new(MemoryRegistry::<Client>::new());
    let (list, b, c) = backends(&primary);
    let upstream: Arc<dyn Registry<Client>> = primary.clone();
    b.clone().follow(upstream.clone());
    c.clone().follow(upstream);

    let stored = primary.create(Client::new("acme", "", vec![])).await.unwrap();
    let observer = QuorumObserver::new(list, 0, Duration::from_secs(2));
    observer.observe("acme", stored.resource_version()).await.unwrap();

    assert_eq!(b.get("acme").await.unwrap().resource_version(), stored.resource_version());
    assert_eq!(c.version().await, primary.version().await);
}

fn issuer(observer: QuorumObserver<AccessToken>, access_tokens: Arc<MemoryRegistry<AccessToken>>) -> TokenIssuer {
    let registries = Registries { access_tokens, ..Registries::in_memory() };
    let users = Arc::new(InMemoryUserDirectory::with_users([UserInfo::new("alice", "uid-1")]));
    TokenIssuer::new(&Config::for_testing(), registries, users, observer)
}

#[tokio::test]
async fn test_issuer_waits_for_replicas() {
    let primary = Arc::new(MemoryRegistry::<AccessToken>::new());
    let follower = Arc::new(MemoryRegistry::<AccessToken>::new());
    follower.clone().follow(primary.clone());

    let observer = QuorumObserver::new(
        vec![ReplicaBackend::new("primary", primary.clone()), ReplicaBackend::new("follower", follower.clone())],
        0,
        Duration::from_secs(2),
    );
    let issuer = issuer(observer, primary);
    let user = UserInfo::new("alice", "uid-1");
    let issued = issuer
        .create_access_token(&user, "acme", vec!["read".into()], "https://acme.example/cb", None)
        .await
        .unwrap();

    // Released only once the follower has the record.
    assert!(follower.get(issued.token.name()).await.is_ok());
}

#[tokio::test]
async fn test_issuer_surfaces_replication_timeout() {
    let primary = Arc::new(MemoryRegistry::<AccessToken>::new());
    let silent = Arc::new(MemoryRegistry::<AccessToken>::new());
    let observer = QuorumObserver::new(
        vec![ReplicaBackend::new("primary", primary.clone()), ReplicaBackend::new("silent", silent)],
        2,
        TIMEOUT,
    );
    let issuer = issuer(observer, primary);
    let user = UserInfo::new("alice", "uid-1");

    let err = issuer
        .create_access_token(&user, "acme", vec!["read".into()], "https://acme.example/cb", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "replication_timeout");
    assert!(err.to_string().contains("silent: timed out"));
}

//! End-to-end tests of the HTTP surface through the axum router.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::Value;
use tower::ServiceExt;

use oauth_engine::auth::{InMemoryUserDirectory, RequestHeaderAuthenticator};
use oauth_engine::config::Config;
use oauth_engine::models::{Client, ClientAuthorization, GrantMethod, UserInfo};
use oauth_engine::observer::QuorumObserver;
use oauth_engine::registry::{Registries, Registry};
use oauth_engine::server::{AppState, create_router};
use oauth_engine::TokenIssuer;

const REDIRECT: &str = "https://acme.example/cb";

struct Harness {
    router: Router,
    registries: Registries,
}

async fn harness(client: Client) -> Harness {
    let config = Config::for_testing();
    let registries = Registries::in_memory();
    registries.clients.create(client).await.unwrap();

    let users = Arc::new(InMemoryUserDirectory::with_users([UserInfo::new("alice", "uid-1")]));
    let issuer = TokenIssuer::new(&config, registries.clone(), users, QuorumObserver::disabled());
    let state = AppState::new(config, Arc::new(issuer), Arc::new(RequestHeaderAuthenticator::new()));
    Harness { router: create_router(Arc::new(state)), registries }
}

fn acme() -> Client {
    Client::new("acme", "s3cret", vec![REDIRECT.into()])
}

fn as_alice(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header("x-remote-user", "alice").header("x-remote-user-uid", "uid-1")
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

fn location(response: &Response) -> String {
    assert_eq!(response.status(), StatusCode::FOUND, "expected a redirect");
    response.headers()[header::LOCATION].to_str().unwrap().to_owned()
}

fn query_of(target: &str) -> HashMap<String, String> {
    let url = url::Url::parse("http://localhost").unwrap().join(target).unwrap();
    url.query_pairs().into_owned().collect()
}

async fn json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn authorize_uri(extra: &str) -> String {
    format!(
        "/oauth/authorize?client_id=acme&redirect_uri={}&response_type=code&state=xyz&scope=read{extra}",
        url::form_urlencoded::byte_serialize(REDIRECT.as_bytes()).collect::<String>()
    )
}

fn token_request(pairs: &[(&str, &str)]) -> Request<Body> {
    Request::post("/oauth/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(pairs).unwrap()))
        .unwrap()
}

/// Walk the consent page for a prompt redirect and return the `then` target.
async fn approve(router: &Router, grant_location: &str) -> String {
    let response = send(router, as_alice(Request::get(grant_location)).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_owned();
    let (pair, _) = cookie.split_once(';').unwrap();
    let (_, csrf) = pair.split_once('=').unwrap();

    let params = query_of(grant_location);
    let body = serde_urlencoded::to_string([
        ("then", params["then"].as_str()),
        ("csrf", csrf),
        ("client_id", params["client_id"].as_str()),
        ("user_name", "alice"),
        ("scopes", params["scopes"].as_str()),
        ("redirect_uri", params["redirect_uri"].as_str()),
        ("approve", "true"),
    ])
    .unwrap();
    let response = send(
        router,
        as_alice(Request::post("/oauth/grant"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, pair)
            .body(Body::from(body))
            .unwrap(),
    )
    .await;
    let then = location(&response);
    assert_eq!(then, params["then"]);
    then
}

#[tokio::test]
async fn test_full_flow_authorize_grant_token_info() {
    let h = harness(acme()).await;

    // Unapproved: sent to the consent page.
    let response = send(&h.router, as_alice(Request::get(authorize_uri(""))).body(Body::empty()).unwrap()).await;
    let grant_location = location(&response);
    assert!(grant_location.starts_with("/oauth/grant?"));

    let then = approve(&h.router, &grant_location).await;
    let stored = h.registries.authorizations.get("alice:acme").await.unwrap();
    assert_eq!(stored.scopes, vec!["read"]);

    // Approved: redirected to the client with a code.
    let response = send(&h.router, as_alice(Request::get(&then)).body(Body::empty()).unwrap()).await;
    let callback = location(&response);
    assert!(callback.starts_with(REDIRECT));
    let params = query_of(&callback);
    assert_eq!(params["state"], "xyz");
    let code = params["code"].clone();

    let response = send(
        &h.router,
        token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT),
            ("client_id", "acme"),
            ("client_secret", "s3cret"),
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body = json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "read");
    let bearer = body["access_token"].as_str().unwrap().to_owned();

    let response = send(
        &h.router,
        Request::get("/oauth/info")
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let info = json(response).await;
    assert_eq!(info["client_id"], "acme");
    assert_eq!(info["user_name"], "alice");
    assert_eq!(info["user_uid"], "uid-1");
    assert_eq!(info["scope"], "read");

    // Codes are single use.
    let response = send(
        &h.router,
        token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "acme"),
            ("client_secret", "s3cret"),
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_auto_client_skips_consent_and_uses_pkce() {
    let h = harness(acme().with_grant_method(GrantMethod::Auto)).await;
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    let uri = authorize_uri(&format!("&code_challenge={challenge}&code_challenge_method=S256"));
    let response = send(&h.router, as_alice(Request::get(uri)).body(Body::empty()).unwrap()).await;
    let code = query_of(&location(&response))["code"].clone();

    let wrong = send(
        &h.router,
        token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "acme"),
            ("client_secret", "s3cret"),
            ("code_verifier", "not-the-verifier"),
        ]),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);

    // The failed attempt consumed the code; a fresh one with the right verifier works.
    let uri = authorize_uri(&format!("&code_challenge={challenge}&code_challenge_method=S256"));
    let response = send(&h.router, as_alice(Request::get(uri)).body(Body::empty()).unwrap()).await;
    let code = query_of(&location(&response))["code"].clone();
    let response = send(
        &h.router,
        token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "acme"),
            ("client_secret", "s3cret"),
            ("code_verifier", verifier),
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_denied_consent_returns_access_denied_to_client() {
    let h = harness(acme()).await;
    let response = send(&h.router, as_alice(Request::get(authorize_uri(""))).body(Body::empty()).unwrap()).await;
    let grant_location = location(&response);

    // The consent page sends the browser back with error=access_denied.
    let then = query_of(&grant_location)["then"].clone();
    let denied = format!("{then}&error=access_denied");
    let response = send(&h.router, as_alice(Request::get(&denied)).body(Body::empty()).unwrap()).await;
    let callback = location(&response);
    let params = query_of(&callback);
    assert_eq!(params["error"], "access_denied");
    assert_eq!(params["state"], "xyz");
    assert!(!params.contains_key("code"));
}

#[tokio::test]
async fn test_deny_client_never_issues_code() {
    let h = harness(acme().with_grant_method(GrantMethod::Deny)).await;
    let response = send(&h.router, as_alice(Request::get(authorize_uri(""))).body(Body::empty()).unwrap()).await;
    assert_eq!(query_of(&location(&response))["error"], "access_denied");
}

#[tokio::test]
async fn test_authorization_held_by_other_uid_blocks_auto_approval() {
    let h = harness(acme().with_grant_method(GrantMethod::Auto)).await;
    h.registries
        .authorizations
        .create(ClientAuthorization::new("alice", "uid-old", "acme", vec!["read".into()]).unwrap())
        .await
        .unwrap();

    let response = send(&h.router, as_alice(Request::get(authorize_uri(""))).body(Body::empty()).unwrap()).await;
    let params = query_of(&location(&response));
    assert_eq!(params["error"], "server_error");
    assert_eq!(params["state"], "xyz");
    assert!(!params.contains_key("code"));

    let stored = h.registries.authorizations.get("alice:acme").await.unwrap();
    assert_eq!(stored.user_uid, "uid-old");
}

#[tokio::test]
async fn test_unauthenticated_authorize_is_401() {
    let h = harness(acme()).await;
    let response = send(&h.router, Request::get(authorize_uri("")).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authorize_rejects_unregistered_redirect() {
    let h = harness(acme()).await;
    let response = send(
        &h.router,
        as_alice(Request::get("/oauth/authorize?client_id=acme&redirect_uri=https%3A%2F%2Fevil.example%2F&response_type=code"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_token_rejects_bad_client_secret_and_unknown_grant() {
    let h = harness(acme()).await;

    let response = send(
        &h.router,
        token_request(&[("grant_type", "authorization_code"), ("code", "x"), ("client_id", "acme"), ("client_secret", "guess")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(response).await["error"], "invalid_client");

    let response = send(
        &h.router,
        token_request(&[("grant_type", "password"), ("client_id", "acme"), ("client_secret", "s3cret")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_info_rejects_unknown_bearer() {
    let h = harness(acme()).await;
    let response = send(&h.router, Request::get("/oauth/info?code=garbage").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(response).await["error"], "invalid_token");
}

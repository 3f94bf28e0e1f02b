//! End-to-end scenarios driven over real TCP: a running proxy server in
//! front of `wiremock`-mocked upstreams, exercised with plain `reqwest`
//! clients. Probe-sweep enable/disable behavior is covered at the unit
//! level in `health.rs`, since it needs no live proxy server.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mirrorgate::health::build_probe_client;
use mirrorgate::metrics::Metrics;
use mirrorgate::mirror::{InMemoryMirrorStore, MirrorRecord, MirrorRegistry};
use mirrorgate::server::{self, AppState};
use mirrorgate::traffic::InMemoryTrafficSink;
use std::sync::Arc;
use tokio::sync::Notify;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_proxy(mirrors: Vec<MirrorRecord>, listen_addr: &str) -> Arc<Notify> {
    let store = InMemoryMirrorStore::from_records(mirrors);
    let registry = MirrorRegistry::new(Arc::new(store));
    registry.refresh().await;

    let state = AppState {
        registry,
        traffic: Arc::new(InMemoryTrafficSink::default()),
        upstream_client: build_probe_client(std::time::Duration::from_secs(30)),
        metrics: Metrics::install(),
    };

    let shutdown = Arc::new(Notify::new());
    let addr = listen_addr.to_string();
    let s = shutdown.clone();
    tokio::spawn(async move {
        let _ = server::run_proxy_server(&addr, state, s).await;
    });
    // Give the listener a moment to bind before the first request.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown
}

#[tokio::test]
async fn s1_anonymous_pull_through_transparent_mirror() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/library/alpine/manifests/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string("X"))
        .mount(&upstream)
        .await;

    let mirror = MirrorRecord::new("hub", upstream.uri());
    let shutdown = spawn_proxy(vec![mirror], "127.0.0.1:18180").await;

    let resp = reqwest::get("http://127.0.0.1:18180/v2/library/alpine/manifests/latest")
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "X");

    shutdown.notify_waiters();
}

#[tokio::test]
async fn s2_bearer_challenge_with_stored_creds_succeeds_on_retry() {
    let auth = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t"))
        .and(query_param("service", "reg"))
        .and(query_param("scope", "repository:priv/app:pull"))
        .and(header("authorization", "Basic dTpw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "TOK"})))
        .mount(&auth)
        .await;

    let registry = MockServer::start().await;
    let realm = format!("{}/t", auth.uri());
    Mock::given(method("GET"))
        .and(path("/v2/priv/app/manifests/1"))
        .and(header("authorization", "Bearer TOK"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/priv/app/manifests/1"))
        .respond_with(
            ResponseTemplate::new(401).insert_header(
                "www-authenticate",
                format!(
                    r#"Bearer realm="{realm}",service="reg",scope="repository:priv/app:pull""#
                ),
            ),
        )
        .mount(&registry)
        .await;

    let mirror = MirrorRecord::new("priv", registry.uri()).with_credentials("u", "p");
    let shutdown = spawn_proxy(vec![mirror], "127.0.0.1:18181").await;

    let resp = reqwest::get("http://127.0.0.1:18181/v2/priv/app/manifests/1")
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");

    shutdown.notify_waiters();
}

#[tokio::test]
async fn s3_bearer_challenge_token_fetch_failure_replays_original_401() {
    let auth = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&auth)
        .await;

    let registry = MockServer::start().await;
    let realm = format!("{}/t", auth.uri());
    Mock::given(method("GET"))
        .and(path("/v2/priv/app/manifests/1"))
        .respond_with(
            ResponseTemplate::new(401).insert_header(
                "www-authenticate",
                format!(r#"Bearer realm="{realm}",service="reg""#),
            ),
        )
        .mount(&registry)
        .await;

    let mirror = MirrorRecord::new("priv", registry.uri());
    let shutdown = spawn_proxy(vec![mirror], "127.0.0.1:18182").await;

    let resp = reqwest::get("http://127.0.0.1:18182/v2/priv/app/manifests/1")
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let challenge = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    assert!(challenge.contains("127.0.0.1:18182/token?_upstream_realm="));
    assert!(challenge.contains(r#"service="reg""#));

    let b64_start = challenge.find("_upstream_realm=").unwrap() + "_upstream_realm=".len();
    let rest = &challenge[b64_start..];
    let encoded = &rest[..rest.find('"').unwrap_or(rest.len())];
    let decoded_url = mirrorgate::proxy::token::resolve_upstream_realm(Some(encoded));
    assert_eq!(decoded_url, realm);

    shutdown.notify_waiters();
}

#[tokio::test]
async fn s4_prefix_routing_selects_matching_mirror() {
    let ghcr = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/o/r/manifests/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("GHCR"))
        .mount(&ghcr)
        .await;

    let hub = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/library/alpine/manifests/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string("HUB"))
        .mount(&hub)
        .await;

    let m1 = MirrorRecord::new("ghcr", ghcr.uri()).with_route_prefix("ghcr");
    let m2 = MirrorRecord::new("hub", hub.uri());
    let shutdown = spawn_proxy(vec![m1, m2], "127.0.0.1:18183").await;

    let r1 = reqwest::get("http://127.0.0.1:18183/v2/ghcr/o/r/manifests/v1")
        .await
        .unwrap();
    assert_eq!(r1.text().await.unwrap(), "GHCR");

    let r2 = reqwest::get("http://127.0.0.1:18183/v2/library/alpine/manifests/latest")
        .await
        .unwrap();
    assert_eq!(r2.text().await.unwrap(), "HUB");

    shutdown.notify_waiters();
}

#[tokio::test]
async fn s5_token_relay_forwards_query_and_body() {
    let auth = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t"))
        .and(query_param("service", "reg"))
        .and(query_param("scope", "repository:x:pull"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "T"})))
        .mount(&auth)
        .await;

    let realm = format!("{}/t", auth.uri());
    let encoded = URL_SAFE_NO_PAD.encode(realm.as_bytes());

    let mirror = MirrorRecord::new("hub", "https://unused.invalid");
    let shutdown = spawn_proxy(vec![mirror], "127.0.0.1:18184").await;

    let url = format!(
        "http://127.0.0.1:18184/token?_upstream_realm={encoded}&service=reg&scope=repository:x:pull"
    );
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["token"], "T");

    shutdown.notify_waiters();
}

#[tokio::test]
async fn token_endpoint_rejects_non_get_methods() {
    let mirror = MirrorRecord::new("hub", "https://unused.invalid");
    let shutdown = spawn_proxy(vec![mirror], "127.0.0.1:18185").await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:18185/token?_upstream_realm=x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);

    shutdown.notify_waiters();
}

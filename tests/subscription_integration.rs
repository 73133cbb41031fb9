//! Integration tests against a thin subscription server
//!
//! The server serves a base64 Shadowsocks subscription with a usage header
//! and counts how often it is hit, so the tests can check coalescing and
//! caching through the real reqwest fetcher.

use std::io::Write;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tempfile::NamedTempFile;
use tokio::time::sleep;

use subforge::cache::{MemoryCache, SubscriptionCache};
use subforge::config::load_config_file;
use subforge::encode::{encode_nodes, EncodeOptions, TargetClient};
use subforge::node::NodeFilter;
use subforge::provider::{
    build_provider, get_provider_nodes, FetchError, ReqwestFetcher, ResourceLoader,
};

const USERINFO: &str = "upload=1073741824; download=1073741824; total=10737418240; expire=0";

/// Find an available port for testing
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to address")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

#[derive(Clone)]
struct ServerState {
    hits: Arc<AtomicUsize>,
    user_agents: Arc<Mutex<Vec<String>>>,
}

fn subscription_body() -> String {
    let userinfo = STANDARD.encode("aes-256-gcm:pw");
    STANDARD.encode(format!(
        "ss://{u}@1.1.1.1:443#HK%2001\nss://{u}@2.2.2.2:8388#US%2001\nss://{u}@3.3.3.3:443#Expired\n",
        u = userinfo
    ))
}

async fn subscription_handler(State(state): State<ServerState>, headers: HeaderMap) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(ua) = headers.get("user-agent").and_then(|v| v.to_str().ok()) {
        state.user_agents.lock().unwrap().push(ua.to_string());
    }

    // Slow enough for concurrent callers to overlap
    sleep(Duration::from_millis(100)).await;
    ([("subscription-userinfo", USERINFO)], subscription_body())
}

async fn failing_handler(State(state): State<ServerState>) -> StatusCode {
    state.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::BAD_GATEWAY
}

/// Start a thin subscription server
async fn start_subscription_server(port: u16) -> ServerState {
    let state = ServerState {
        hits: Arc::new(AtomicUsize::new(0)),
        user_agents: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/sub", get(subscription_handler))
        .route("/fail", get(failing_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind subscription server");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    sleep(Duration::from_millis(50)).await;
    state
}

fn loader_with(cache: Arc<dyn SubscriptionCache>) -> Arc<ResourceLoader> {
    let fetcher = Arc::new(ReqwestFetcher::new(Duration::from_secs(5)).unwrap());
    Arc::new(ResourceLoader::new(cache, fetcher, Duration::from_secs(600)))
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let port = find_available_port();
    let server = start_subscription_server(port).await;
    let loader = loader_with(Arc::new(MemoryCache::new()));
    let url = format!("http://127.0.0.1:{}/sub", port);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let loader = loader.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            loader.request_cacheable_resource(&url, None).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    assert_eq!(loader.pending_count(), 0);

    let usage = results[0].subscription_userinfo.unwrap();
    assert_eq!(usage.used(), 2 * 1024 * 1024 * 1024);

    // Served from the cache afterwards
    loader.request_cacheable_resource(&url, None).await.unwrap();
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);

    let agents = server.user_agents.lock().unwrap().clone();
    assert!(agents[0].starts_with("subforge/"));
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let port = find_available_port();
    let server = start_subscription_server(port).await;
    let loader = loader_with(Arc::new(MemoryCache::new()));
    let url = format!("http://127.0.0.1:{}/fail", port);

    for expected_hits in 1..=2 {
        let result = loader.request_cacheable_resource(&url, None).await;
        assert!(matches!(result, Err(FetchError::Status { status: 502, .. })));
        assert_eq!(server.hits.load(Ordering::SeqCst), expected_hits);
    }
}

#[tokio::test]
async fn test_unreachable_server() {
    let port = find_available_port();
    let loader = loader_with(Arc::new(MemoryCache::new()));
    let url = format!("http://127.0.0.1:{}/sub", port);

    let result = loader.request_cacheable_resource(&url, None).await;
    assert!(matches!(result, Err(FetchError::Http { .. })));
}

#[tokio::test]
async fn test_config_to_surge_lines() {
    let port = find_available_port();
    let server = start_subscription_server(port).await;

    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            // subscription served by the test server
            "providers": {{
                "demo": {{
                    "type": "shadowsocks_subscribe",
                    "url": "http://127.0.0.1:{}/sub",
                    "udp-relay": true,
                    "add-flag": true,
                    "node-filter": {{"discard-keywords": ["Expired"]}},
                    "request-user-agent": "surge",
                    "custom-filters": {{"us": {{"keywords": ["US"]}}}}
                }}
            }}
        }}"#,
        port
    )
    .unwrap();

    let config = Arc::new(load_config_file(file.path()).unwrap());
    let loader = loader_with(Arc::new(MemoryCache::new()));
    let mut provider = build_provider("demo", &config, loader).unwrap();

    let nodes = get_provider_nodes(provider.as_mut(), None).await.unwrap();
    assert_eq!(nodes.len(), 2);

    let options = EncodeOptions::for_target(&config, TargetClient::Surge);
    let output = encode_nodes(&nodes, Some(&NodeFilter::all()), TargetClient::Surge, &options).unwrap();
    assert_eq!(
        output.lines,
        vec![
            "🇭🇰 HK 01 = ss, 1.1.1.1, 443, encrypt-method=aes-256-gcm, password=pw, udp-relay=true",
            "🇺🇸 US 01 = ss, 2.2.2.2, 8388, encrypt-method=aes-256-gcm, password=pw, udp-relay=true",
        ]
    );

    let us = provider.base().config.filter("us").unwrap();
    let output = encode_nodes(&nodes, Some(&us), TargetClient::Surfboard, &options).unwrap();
    assert_eq!(output.lines.len(), 1);
    assert!(output.lines[0].starts_with("🇺🇸 US 01 = ss, 2.2.2.2, 8388"));

    let usage = provider.get_subscription_userinfo(None).await.unwrap().unwrap();
    assert_eq!(usage.remaining(), 8 * 1024 * 1024 * 1024);

    // Node list and usage share one cached response
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    let agents = server.user_agents.lock().unwrap().clone();
    assert!(agents[0].starts_with("surge subforge/"));
}

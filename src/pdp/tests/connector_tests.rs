//! External adapter integration tests
//!
//! Runs minimal HTTP stubs on loopback sockets to exercise the OAuth
//! client-credentials handshake, the adapter wire format, per-call
//! timeouts, and fail-closed behavior when an adapter misbehaves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use trellis_pdp::cache::InMemoryAttributeCache;
use trellis_pdp::connector::{AdapterEndpoint, ConnectorConfig, InMemoryConnectorRegistry};
use trellis_pdp::engine::{EngineConfig, PdpEngine};
use trellis_pdp::error::PdpError;
use trellis_pdp::hierarchy::InMemoryEntityStore;
use trellis_pdp::policy::{
    Condition, Effect, InMemoryPolicyStore, Policy, PolicySet, PolicySetSelection, Target,
};
use trellis_pdp::types::PolicyMatchCandidate;

const TOKEN_BODY: &str = r#"{"access_token":"test-token","expires_in":300}"#;
const ATTRIBUTES_BODY: &str = r#"{
    "id": "agent_mulder",
    "attributes": [{ "issuer": "acs", "name": "site", "value": "boston" }]
}"#;

// ============================================================================
// HTTP STUB PLUMBING
// ============================================================================

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = header_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            if buf.len() >= end + content_length(&head) {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn respond_json(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Stub server answering every request with a fixed body
async fn spawn_stub(status: &'static str, body: &'static str, hits: Arc<AtomicUsize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            hits.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = read_request(&mut stream).await;
                respond_json(&mut stream, status, body).await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Stub that reads the request and never answers
async fn spawn_stalling_stub() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = read_request(&mut stream).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    format!("http://{}", addr)
}

fn endpoint(url: String, token_url: String) -> AdapterEndpoint {
    AdapterEndpoint {
        url,
        token_url,
        client_id: "pdp".to_string(),
        client_secret: "secret".to_string(),
    }
}

fn site_policy() -> Policy {
    Policy::new(
        "site-operators",
        Target::new("site/{site_id}", "GET"),
        Effect::Permit,
    )
    .with_condition(Condition::new(
        r#"resource.uriVariable("site_id") in subject.attributes("acs", "site")"#,
    ))
}

async fn seeded_policies() -> Arc<InMemoryPolicyStore> {
    let policies = Arc::new(InMemoryPolicyStore::new());
    policies
        .put_policy_set("acme", PolicySet::new("default").with_policy(site_policy()))
        .await;
    policies
}

async fn registry_with_subject_connector(config: ConnectorConfig) -> Arc<InMemoryConnectorRegistry> {
    let registry = Arc::new(InMemoryConnectorRegistry::new());
    registry.set_subject_connector("acme", config).await;
    registry
}

// ============================================================================
// ADAPTER INTEGRATION
// ============================================================================

#[tokio::test]
async fn test_adapter_attributes_flow_into_decision() {
    let token_hits = Arc::new(AtomicUsize::new(0));
    let token_url = spawn_stub("200 OK", TOKEN_BODY, token_hits.clone()).await;
    let adapter_url = spawn_stub("200 OK", ATTRIBUTES_BODY, Arc::new(AtomicUsize::new(0))).await;

    let registry = registry_with_subject_connector(
        ConnectorConfig::new().with_adapter(endpoint(adapter_url, token_url)),
    )
    .await;

    let engine = PdpEngine::builder()
        .policy_store(seeded_policies().await)
        .entity_store(Arc::new(InMemoryEntityStore::new()))
        .connector_registry(registry)
        .build()
        .unwrap();

    let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET");
    let decision = engine
        .evaluate("acme", &candidate, PolicySetSelection::All)
        .await
        .unwrap();

    assert!(decision.is_permit(), "Adapter-asserted site should grant access");
    assert!(token_hits.load(Ordering::SeqCst) >= 1, "Token endpoint was consulted");
}

#[tokio::test]
async fn test_adapter_failure_fails_closed() {
    let token_url = spawn_stub("200 OK", TOKEN_BODY, Arc::new(AtomicUsize::new(0))).await;
    let adapter_url = spawn_stub(
        "500 Internal Server Error",
        r#"{"error":"boom"}"#,
        Arc::new(AtomicUsize::new(0)),
    )
    .await;

    let registry = registry_with_subject_connector(
        ConnectorConfig::new().with_adapter(endpoint(adapter_url, token_url)),
    )
    .await;

    let engine = PdpEngine::builder()
        .policy_store(seeded_policies().await)
        .entity_store(Arc::new(InMemoryEntityStore::new()))
        .connector_registry(registry)
        .build()
        .unwrap();

    let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET");
    let result = engine
        .evaluate("acme", &candidate, PolicySetSelection::All)
        .await;

    assert!(
        matches!(result, Err(PdpError::Retrieval { .. })),
        "A failing adapter must abort the decision, not deny or permit"
    );
}

#[tokio::test]
async fn test_adapter_timeout_is_bounded() {
    let token_url = spawn_stub("200 OK", TOKEN_BODY, Arc::new(AtomicUsize::new(0))).await;
    let adapter_url = spawn_stalling_stub().await;

    let registry = registry_with_subject_connector(
        ConnectorConfig::new().with_adapter(endpoint(adapter_url, token_url)),
    )
    .await;

    let engine = PdpEngine::builder()
        .policy_store(seeded_policies().await)
        .entity_store(Arc::new(InMemoryEntityStore::new()))
        .connector_registry(registry)
        .config(EngineConfig {
            adapter_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .build()
        .unwrap();

    let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET");
    let started = Instant::now();
    let result = engine
        .evaluate("acme", &candidate, PolicySetSelection::All)
        .await;

    assert!(matches!(result, Err(PdpError::Retrieval { .. })));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "A stalled adapter must not hang the decision"
    );
}

#[tokio::test]
async fn test_inactive_connector_is_skipped() {
    let adapter_hits = Arc::new(AtomicUsize::new(0));
    let token_url = spawn_stub("200 OK", TOKEN_BODY, Arc::new(AtomicUsize::new(0))).await;
    let adapter_url = spawn_stub("200 OK", ATTRIBUTES_BODY, adapter_hits.clone()).await;

    let mut config = ConnectorConfig::new().with_adapter(endpoint(adapter_url, token_url));
    config.is_active = false;
    let registry = registry_with_subject_connector(config).await;

    let engine = PdpEngine::builder()
        .policy_store(seeded_policies().await)
        .entity_store(Arc::new(InMemoryEntityStore::new()))
        .connector_registry(registry)
        .build()
        .unwrap();

    let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET");
    let decision = engine
        .evaluate("acme", &candidate, PolicySetSelection::All)
        .await
        .unwrap();

    assert!(!decision.is_permit(), "Without the adapter the condition fails");
    assert_eq!(adapter_hits.load(Ordering::SeqCst), 0, "Inactive connector never called");
}

#[tokio::test]
async fn test_adapter_results_are_cached() {
    let adapter_hits = Arc::new(AtomicUsize::new(0));
    let token_url = spawn_stub("200 OK", TOKEN_BODY, Arc::new(AtomicUsize::new(0))).await;
    let adapter_url = spawn_stub("200 OK", ATTRIBUTES_BODY, adapter_hits.clone()).await;

    let registry = registry_with_subject_connector(
        ConnectorConfig::new()
            .with_adapter(endpoint(adapter_url, token_url))
            .with_cached_interval_seconds(60),
    )
    .await;

    let engine = PdpEngine::builder()
        .policy_store(seeded_policies().await)
        .entity_store(Arc::new(InMemoryEntityStore::new()))
        .connector_registry(registry)
        .attribute_cache(Arc::new(InMemoryAttributeCache::default()))
        .build()
        .unwrap();

    let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET");
    for _ in 0..2 {
        let decision = engine
            .evaluate("acme", &candidate, PolicySetSelection::All)
            .await
            .unwrap();
        assert!(decision.is_permit());
    }

    assert_eq!(
        adapter_hits.load(Ordering::SeqCst),
        1,
        "Second evaluation should be served from the attribute cache"
    );
}

#[tokio::test]
async fn test_bearer_token_is_reused() {
    let token_hits = Arc::new(AtomicUsize::new(0));
    let token_url = spawn_stub("200 OK", TOKEN_BODY, token_hits.clone()).await;
    let adapter_hits = Arc::new(AtomicUsize::new(0));
    let adapter_url = spawn_stub("200 OK", ATTRIBUTES_BODY, adapter_hits.clone()).await;

    let registry = registry_with_subject_connector(
        ConnectorConfig::new().with_adapter(endpoint(adapter_url, token_url)),
    )
    .await;

    let engine = PdpEngine::builder()
        .policy_store(seeded_policies().await)
        .entity_store(Arc::new(InMemoryEntityStore::new()))
        .connector_registry(registry)
        .build()
        .unwrap();

    for site in ["boston", "denver"] {
        let candidate =
            PolicyMatchCandidate::new("agent_mulder", format!("site/{}", site), "GET");
        let _ = engine
            .evaluate("acme", &candidate, PolicySetSelection::All)
            .await
            .unwrap();
    }

    assert_eq!(adapter_hits.load(Ordering::SeqCst), 2, "No attribute cache configured");
    assert_eq!(
        token_hits.load(Ordering::SeqCst),
        1,
        "The bearer token should be fetched once and reused"
    );
}

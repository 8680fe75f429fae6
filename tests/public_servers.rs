//! Integration tests against public HTTP servers.
//!
//! These tests are `#[ignore]` by default because they require network access.
//! Run them manually with:
//!
//!   cargo test --test public_servers -- --ignored --nocapture

use http::{Method, StatusCode, Version};
use rest_engine_http::{EngineConfig, HttpEngine, ProtocolVersion, RequestDescriptor};

fn get(url: &str) -> RequestDescriptor {
    RequestDescriptor::parse(Method::GET, url)
        .unwrap()
        .timeout(std::time::Duration::from_secs(10))
}

#[test]
#[ignore]
fn test_plain_http() {
    let engine = HttpEngine::new().unwrap();
    let response = engine.invoke(get("http://example.com/")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: String = response.read_entity().unwrap();
    assert!(body.contains("Example Domain"));
}

#[test]
#[ignore]
fn test_https() {
    let engine = HttpEngine::with_config(EngineConfig {
        protocol: ProtocolVersion::Http1,
        ..Default::default()
    })
    .unwrap();
    let response = engine.invoke(get("https://example.com/")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.version(), Version::HTTP_11);
}

#[test]
#[ignore]
fn test_alpn_negotiates_http2() {
    let engine = HttpEngine::new().unwrap();
    let response = engine.invoke(get("https://www.google.com/")).unwrap();
    assert_eq!(response.version(), Version::HTTP_2);
    response.close();
}

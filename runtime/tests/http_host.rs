//! Integration tests for the HTTP-backed script host
//!
//! Runs full requests through `HttpScriptHost` against a wiremock server that
//! answers with real JSONP bodies.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use jsonp_core::environment::HostCapabilities;
use jsonp_core::outcome::{FailureKind, Resolution};
use jsonp_runtime::http_host::HttpScriptHost;
use jsonp_runtime::{JsonpClient, JsonpError, RequestDescriptor};
use jsonp_testing::{HookRecorder, init_tracing};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Answers `<cb>(<payload>);`, reading the function name from the `cb` query
struct EchoCallback {
    payload: Value,
    delay: Duration,
}

impl EchoCallback {
    fn new(payload: Value) -> Self {
        Self {
            payload,
            delay: Duration::ZERO,
        }
    }

    fn delayed(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

impl Respond for EchoCallback {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let callback = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "cb")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        ResponseTemplate::new(200)
            .insert_header("content-type", "application/javascript")
            .set_body_string(format!("{callback}({});", self.payload))
            .set_delay(self.delay)
    }
}

fn feed(server: &MockServer) -> RequestDescriptor {
    RequestDescriptor::new(format!("{}/feed", server.uri()))
        .with_callback_parameter("cb")
        .with_timeout(Duration::from_secs(5))
}

fn client_for(server: &MockServer, capabilities: HostCapabilities) -> (JsonpClient, HttpScriptHost) {
    init_tracing();
    let host = HttpScriptHost::new(server.uri()).with_capabilities(capabilities);
    (JsonpClient::new(Arc::new(host.clone())), host)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn delivers_payload_from_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(query_param("q", "rust"))
        .respond_with(EchoCallback::new(json!({"items": [1, 2, 3]})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, host) = client_for(&server, HostCapabilities::standard());
    let payload = client
        .fetch(feed(&server).with_data("q=rust"))
        .await
        .unwrap();

    assert_eq!(payload, json!({"items": [1, 2, 3]}));
    assert_eq!(host.attached(), 0);
    assert!(client.registry().is_empty());
}

#[tokio::test]
async fn hooks_fire_for_http_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(EchoCallback::new(json!("hello")))
        .mount(&server)
        .await;

    let (client, _host) = client_for(&server, HostCapabilities::standard());
    let recorder = HookRecorder::new();
    let handle = client.submit(
        feed(&server)
            .on_success(recorder.on_success::<jsonp_runtime::RequestHandle>())
            .on_error(recorder.on_error::<jsonp_runtime::RequestHandle>())
            .on_complete(recorder.on_complete::<jsonp_runtime::RequestHandle>()),
    );

    assert_eq!(handle.wait().await, Resolution::Succeeded(json!("hello")));
    recorder.assert_settled_once();
}

#[tokio::test]
async fn not_found_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (client, host) = client_for(&server, HostCapabilities::standard());
    let result = client.fetch(feed(&server)).await;

    assert_eq!(result, Err(JsonpError::Transport));
    assert_eq!(host.attached(), 0);
}

#[tokio::test]
async fn malformed_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\": \"jsonp\"}"))
        .mount(&server)
        .await;

    let (client, _host) = client_for(&server, HostCapabilities::standard());
    assert_eq!(client.fetch(feed(&server)).await, Err(JsonpError::Transport));
}

#[tokio::test]
async fn trailing_statement_reports_failure_without_error_signal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (client, host) = client_for(&server, HostCapabilities::standard().without_error_signal());
    assert_eq!(client.strategy_name(), "trailing-error");

    let handle = client.submit(feed(&server));
    assert_eq!(handle.wait().await, Resolution::Failed(FailureKind::Error));
    assert_eq!(host.attached(), 0);
}

#[tokio::test]
async fn trailing_statement_is_inert_after_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(EchoCallback::new(json!(42)))
        .mount(&server)
        .await;

    let (client, _host) = client_for(&server, HostCapabilities::standard().without_error_signal());
    let recorder = HookRecorder::new();
    let handle = client.submit(
        feed(&server)
            .on_success(recorder.on_success::<jsonp_runtime::RequestHandle>())
            .on_error(recorder.on_error::<jsonp_runtime::RequestHandle>())
            .on_complete(recorder.on_complete::<jsonp_runtime::RequestHandle>()),
    );

    assert_eq!(handle.wait().await, Resolution::Succeeded(json!(42)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    recorder.assert_settled_once();
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("cb(\"late\");")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let (client, host) = client_for(&server, HostCapabilities::standard());
    let result = client
        .fetch(feed(&server).with_timeout(Duration::from_millis(50)))
        .await;

    assert_eq!(result, Err(JsonpError::Timeout));
    assert_eq!(host.attached(), 0);
}

#[tokio::test]
async fn concurrent_requests_get_their_own_payloads() {
    let server = MockServer::start().await;
    for n in 0..4 {
        Mock::given(method("GET"))
            .and(query_param("n", n.to_string()))
            .respond_with(EchoCallback::new(json!(n)))
            .mount(&server)
            .await;
    }

    let (client, _host) = client_for(&server, HostCapabilities::standard());
    let handles: Vec<_> = (0..4)
        .map(|n| client.submit(feed(&server).with_data(format!("n={n}"))))
        .collect();

    for (n, handle) in handles.iter().enumerate() {
        assert_eq!(handle.wait().await, Resolution::Succeeded(json!(n)));
    }
}

#[tokio::test]
async fn timed_out_ordered_load_does_not_block_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(EchoCallback::new(json!(1)).delayed(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(EchoCallback::new(json!(2)))
        .mount(&server)
        .await;

    let (client, host) = client_for(&server, HostCapabilities::standard().without_error_signal());
    let slow = client.submit(
        RequestDescriptor::new(format!("{}/slow", server.uri()))
            .with_callback_parameter("cb")
            .with_timeout(Duration::from_millis(50)),
    );
    let fast = client.submit(
        RequestDescriptor::new(format!("{}/fast", server.uri()))
            .with_callback_parameter("cb")
            .with_timeout(Duration::from_secs(1)),
    );

    assert_eq!(slow.wait().await, Resolution::Failed(FailureKind::Timeout));
    assert_eq!(fast.wait().await, Resolution::Succeeded(json!(2)));
    assert_eq!(host.attached(), 0);
}

#[tokio::test]
async fn aborted_ordered_load_does_not_block_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hang"))
        .respond_with(EchoCallback::new(json!(1)).delayed(Duration::from_secs(30)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(EchoCallback::new(json!("next")))
        .mount(&server)
        .await;

    let (client, _host) = client_for(&server, HostCapabilities::standard().without_error_signal());
    let hanging = client.submit(
        RequestDescriptor::new(format!("{}/hang", server.uri())).with_callback_parameter("cb"),
    );
    let next = client.submit(feed(&server));

    tokio::time::sleep(Duration::from_millis(50)).await;
    hanging.abort();

    let resolution = tokio::time::timeout(Duration::from_secs(2), next.wait()).await;
    assert_eq!(resolution.unwrap(), Resolution::Succeeded(json!("next")));
    assert_eq!(hanging.resolution(), Some(Resolution::Aborted));
}

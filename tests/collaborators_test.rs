use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qraft_inspector::ai::element::{ElementDiscovery, FindElementRequest, HttpElementDiscovery};
use qraft_inspector::ai::{HttpModelClient, TextModel};
use qraft_inspector::browser::bridge::BridgeBrowser;
use qraft_inspector::browser::{BrowserDriver, NetworkRule, UrlPattern, Viewport};
use qraft_inspector::model::RunResult;
use qraft_inspector::settings::{AiProvider, ProviderKind};
use qraft_inspector::worker::report::{CallbackReporter, ResultReporter};

fn result() -> RunResult {
    RunResult {
        success: true,
        title: "Shop".to_string(),
        ..Default::default()
    }
}

fn reporter(server: &MockServer) -> CallbackReporter {
    CallbackReporter::new(&format!("{}/api/webhooks/inspector", server.uri()), "s3cret")
        .unwrap()
        .with_backoff(Duration::from_millis(10))
}

// ============================================================================
// Result callback
// ============================================================================

#[tokio::test]
async fn test_callback_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/inspector"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/inspector"))
        .and(body_partial_json(json!({"run_id": 7, "secret": "s3cret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .mount(&server)
        .await;

    reporter(&server).report(7, &result()).await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_callback_gives_up_after_bounded_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = reporter(&server).report(7, &result()).await.unwrap_err();

    assert!(err.to_string().contains("after 3 attempts"));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_callback_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Unauthorized"})))
        .mount(&server)
        .await;

    let err = reporter(&server).report(7, &result()).await.unwrap_err();

    assert!(err.to_string().contains("401"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// ============================================================================
// Model providers
// ============================================================================

fn provider(kind: ProviderKind, url: String, model: &str) -> AiProvider {
    AiProvider {
        id: "test".to_string(),
        name: "Test".to_string(),
        kind,
        model: model.to_string(),
        api_key: "k-123".to_string(),
        url,
    }
}

#[tokio::test]
async fn test_openai_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer k-123"))
        .and(body_partial_json(json!({"model": "gpt-4o", "max_tokens": 1000})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"found\": false}"}}]
        })))
        .mount(&server)
        .await;

    let client = HttpModelClient::new(provider(
        ProviderKind::OpenAi,
        format!("{}/v1", server.uri()),
        "gpt-4o",
    ))
    .unwrap();
    let reply = client.complete("find it", Some("AAAA")).await.unwrap();

    assert_eq!(reply, "{\"found\": false}");
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(
        body["messages"][1]["content"][1]["image_url"]["url"],
        "data:image/jpeg;base64,AAAA"
    );
}

#[tokio::test]
async fn test_gemini_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .and(query_param("key", "k-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "hello"}]}}]
        })))
        .mount(&server)
        .await;

    let client = HttpModelClient::new(provider(
        ProviderKind::Gemini,
        format!("{}/v1beta", server.uri()),
        "gemini-1.5-pro",
    ))
    .unwrap();

    assert_eq!(client.complete("hi", None).await.unwrap(), "hello");
}

#[tokio::test]
async fn test_model_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let client = HttpModelClient::new(provider(
        ProviderKind::OpenAi,
        server.uri(),
        "gpt-4o",
    ))
    .unwrap();
    let err = client.complete("hi", None).await.unwrap_err();

    assert!(err.to_string().contains("429"));
    assert!(err.to_string().contains("slow down"));
}

// ============================================================================
// Element discovery
// ============================================================================

#[tokio::test]
async fn test_http_element_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ai/find-element"))
        .and(body_partial_json(json!({"description": "the cart icon"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": true,
            "selector": "[data-testid=cart]",
            "coordinates": {"x": 10.0, "y": 20.0},
            "confidence": 0.8,
            "reasoning": "Top right corner"
        })))
        .mount(&server)
        .await;

    let discovery = HttpElementDiscovery::new(&server.uri()).unwrap();
    let response = discovery
        .find_element(&FindElementRequest {
            screenshot: "AAAA".to_string(),
            description: "the cart icon".to_string(),
        })
        .await
        .unwrap();

    assert!(response.found);
    assert_eq!(response.selector.as_deref(), Some("[data-testid=cart]"));
    assert_eq!(response.coordinates.unwrap().x, 10.0);
}

#[tokio::test]
async fn test_http_element_discovery_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let discovery = HttpElementDiscovery::new(&server.uri()).unwrap();
    let err = discovery
        .find_element(&FindElementRequest {
            screenshot: "AAAA".to_string(),
            description: "anything".to_string(),
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("500"));
}

// ============================================================================
// Browser bridge
// ============================================================================

#[tokio::test]
async fn test_bridge_session_uses_default_viewport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_partial_json(json!({"viewport": {"width": 1280, "height": 800}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "s1"})))
        .expect(1)
        .mount(&server)
        .await;

    let browser = BridgeBrowser::new(&server.uri()).unwrap();
    browser.open_session(Viewport::default()).await.unwrap();
}

#[tokio::test]
async fn test_bridge_routes_carry_installation_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "s1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/s1/routes"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let browser = BridgeBrowser::new(&server.uri()).unwrap();
    let mut session = browser.open_session(Viewport::default()).await.unwrap();
    session
        .install_rule(&NetworkRule::Fulfill {
            pattern: UrlPattern::new("**/api/users").unwrap(),
            status: 500,
            content_type: "application/json".to_string(),
            body: "{}".to_string(),
        })
        .await
        .unwrap();
    session
        .install_rule(&NetworkRule::Abort {
            pattern: UrlPattern::new("**/api/**").unwrap(),
        })
        .await
        .unwrap();

    let routes: Vec<serde_json::Value> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/sessions/s1/routes")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0]["kind"], "fulfill");
    assert_eq!(routes[0]["order"], 0);
    assert_eq!(routes[1]["kind"], "abort");
    assert_eq!(routes[1]["order"], 1);
    assert!(routes.iter().all(|r| r["precedence"] == "first_match"));
}

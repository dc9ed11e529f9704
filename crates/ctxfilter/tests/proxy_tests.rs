//! Integration tests for the HTTP proxy
//!
//! Every test runs the router against a wiremock upstream and inspects what
//! the upstream received and what the client got back.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use ctxfilter::audit::AuditSink;
use ctxfilter::config::Config;
use ctxfilter::filter::MINIMAL_ENV;
use ctxfilter::proxy::{AppState, create_router};

// =============================================================================
// Test Fixtures
// =============================================================================

fn config_for(upstream: &str) -> Config {
    let mut config = Config::default();
    config.proxy.upstream_url = upstream.to_string();
    config.proxy.timeout_secs = 10;
    config
}

fn router_for(config: Config) -> Router {
    let state = AppState::new(Arc::new(config), None).unwrap();
    create_router(Arc::new(state))
}

fn chat_request(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn small_model_chat() -> Value {
    json!({
        "model": "llama3.2:1b",
        "messages": [
            {"role": "system", "content": "<project>src/\n  main.rs</project>\nBe concise."},
            {"role": "user", "content": "hello"}
        ],
        "stream": true
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// JSON bodies of every request the mock upstream received
async fn received_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}

// =============================================================================
// Chat Filtering
// =============================================================================

mod chat_filtering_tests {
    use super::*;

    #[tokio::test]
    async fn test_chat_body_rewritten_before_forwarding() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "chatcmpl-1"})))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let response = router
            .oneshot(chat_request("/v1/chat/completions", &small_model_chat()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], "chatcmpl-1");

        let sent = received_bodies(&mock_server).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0]["messages"][0]["content"],
            format!("Be concise.\n\n{MINIMAL_ENV}")
        );
        assert_eq!(sent[0]["messages"][1]["content"], "hello");
        assert_eq!(sent[0]["stream"], true);
        assert_eq!(sent[0]["options"]["num_ctx"], 8192);
    }

    #[tokio::test]
    async fn test_native_chat_route_filtered() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let response = router
            .oneshot(chat_request("/api/chat", &small_model_chat()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sent = received_bodies(&mock_server).await;
        assert!(
            !sent[0]["messages"][0]["content"]
                .as_str()
                .unwrap()
                .contains("<project>")
        );
    }

    #[tokio::test]
    async fn test_large_model_prompt_untouched() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let mut body = small_model_chat();
        body["model"] = json!("qwen2.5:14b");

        let router = router_for(config_for(&mock_server.uri()));
        router
            .oneshot(chat_request("/v1/chat/completions", &body))
            .await
            .unwrap();

        let sent = received_bodies(&mock_server).await;
        assert_eq!(sent[0]["messages"], body["messages"]);
    }

    #[tokio::test]
    async fn test_filtering_disabled_forwards_prompt() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let mut config = config_for(&mock_server.uri());
        config.filter.enabled = false;

        let body = small_model_chat();
        router_for(config)
            .oneshot(chat_request("/v1/chat/completions", &body))
            .await
            .unwrap();

        let sent = received_bodies(&mock_server).await;
        assert_eq!(sent[0]["messages"], body["messages"]);
    }

    #[tokio::test]
    async fn test_invalid_json_forwarded_unchanged() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::body_string("{not json"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad json"})))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .body(Body::from("{not json"))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "bad json");
    }
}

// =============================================================================
// Transparent Forwarding
// =============================================================================

mod forwarding_tests {
    use super::*;

    #[tokio::test]
    async fn test_non_chat_path_forwarded_untouched() {
        let mock_server = MockServer::start().await;
        let payload = r#"{"model":"llama3.2:1b","prompt":"<project>x</project>"}"#;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .and(matchers::body_string(payload))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "ok"})))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let request = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .body(Body::from(payload))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["response"], "ok");
    }

    #[tokio::test]
    async fn test_get_with_query_string() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/tags"))
            .and(matchers::query_param("verbose", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let request = Request::builder()
            .method("GET")
            .uri("/api/tags?verbose=true")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["models"], json!([]));
    }

    #[tokio::test]
    async fn test_authority_like_path_stays_on_upstream() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/evil.example/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let request = Request::builder()
            .method("GET")
            .uri("//evil.example/api/tags")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_base_path_preserved() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/ollama/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&format!("{}/ollama", mock_server.uri())));
        let response = router
            .oneshot(chat_request("/api/chat", &small_model_chat()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["done"], true);
    }

    #[tokio::test]
    async fn test_headers_forwarded_both_ways() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/version"))
            .and(matchers::header("Authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Upstream", "ollama")
                    .set_body_json(json!({"version": "0.5.0"})),
            )
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let request = Request::builder()
            .method("GET")
            .uri("/api/version")
            .header("Authorization", "Bearer test-token")
            .header("Connection", "keep-alive")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "ollama");

        let received = mock_server.received_requests().await.unwrap();
        assert!(received[0].headers.get("keep-alive").is_none());
    }

    #[tokio::test]
    async fn test_upstream_error_status_relayed() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "model 'tiny' not found"})),
            )
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let response = router
            .oneshot(chat_request("/v1/chat/completions", &small_model_chat()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "model 'tiny' not found");
    }

    #[tokio::test]
    async fn test_upstream_server_error_relayed() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
            .mount(&mock_server)
            .await;

        let router = router_for(config_for(&mock_server.uri()));
        let request = Request::builder()
            .method("GET")
            .uri("/api/ps")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"loading model");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_returns_json_error() {
        let router = router_for(config_for("http://127.0.0.1:1"));

        let response = router
            .oneshot(chat_request("/v1/chat/completions", &small_model_chat()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Network error"));
    }

    #[tokio::test]
    async fn test_options_answered_locally() {
        let mock_server = MockServer::start().await;

        let router = router_for(config_for(&mock_server.uri()));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/chat")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }
}

// =============================================================================
// Audit Records
// =============================================================================

mod audit_tests {
    use super::*;

    #[tokio::test]
    async fn test_filtered_request_written_to_audit_dir() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = config_for(&mock_server.uri());
        config.audit.enabled = true;
        config.audit.dir = temp_dir.path().join("audit");

        let (sink, writer) = AuditSink::spawn(&config.audit);
        let state = AppState::new(Arc::new(config), Some(sink)).unwrap();
        let router = create_router(Arc::new(state));

        let response = router
            .oneshot(chat_request("/v1/chat/completions", &small_model_chat()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The router was the last sink owner; the writer drains and exits.
        tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(temp_dir.path().join("audit"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);

        let record: Value = serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
        assert_eq!(record["path"], "/v1/chat/completions");
        assert_eq!(record["model"], "llama3.2:1b");
        assert!(
            record["before"]["messages"][0]["content"]
                .as_str()
                .unwrap()
                .contains("<project>")
        );
        assert_eq!(
            record["after"]["messages"][0]["content"],
            format!("Be concise.\n\n{MINIMAL_ENV}")
        );
        assert_eq!(record["report"]["context_size_injected"], true);
    }

    #[tokio::test]
    async fn test_non_chat_request_not_audited() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = config_for(&mock_server.uri());
        config.audit.enabled = true;
        config.audit.dir = temp_dir.path().join("audit");

        let (sink, writer) = AuditSink::spawn(&config.audit);
        let state = AppState::new(Arc::new(config), Some(sink)).unwrap();
        let request = Request::builder()
            .method("GET")
            .uri("/api/tags")
            .body(Body::empty())
            .unwrap();

        create_router(Arc::new(state)).oneshot(request).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();

        assert!(!temp_dir.path().join("audit").exists());
    }
}

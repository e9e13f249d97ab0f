use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::stream;
use serde_json::{json, Value};
use tower::ServiceExt;

use ember::config::ChatConfig;
use ember::runtime::{
    Fragment, GenerationRequest, GenerationStats, GenerationStream, ModelDescriptor, Runtime,
    RuntimeError,
};
use ember_server::routes;
use ember_server::state::AppState;

/// Canned runtime standing in for Ollama. Lists a fixed set of models
/// and replies to every generation with the same fragments.
struct CannedRuntime {
    reachable: bool,
    fragments: Vec<&'static str>,
}

impl CannedRuntime {
    fn up(fragments: Vec<&'static str>) -> Self {
        Self {
            reachable: true,
            fragments,
        }
    }

    fn down() -> Self {
        Self {
            reachable: false,
            fragments: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl Runtime for CannedRuntime {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, RuntimeError> {
        if !self.reachable {
            return Err(RuntimeError::Unreachable(
                "connection refused".to_string(),
            ));
        }
        Ok(vec![
            ModelDescriptor {
                name: "codellama:latest".to_string(),
                id: "sha256:aaa".to_string(),
                size: 3_825_819_519,
                modified_at: Some("2026-08-01T10:00:00Z".to_string()),
            },
            ModelDescriptor {
                name: "llama3:latest".to_string(),
                id: "sha256:bbb".to_string(),
                size: 4_661_224_676,
                modified_at: None,
            },
        ])
    }

    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<GenerationStream, RuntimeError> {
        if !self.reachable {
            return Err(RuntimeError::Unreachable(
                "connection refused".to_string(),
            ));
        }
        let mut items: Vec<Result<Fragment, RuntimeError>> = self
            .fragments
            .iter()
            .map(|text| Ok(Fragment::text(*text)))
            .collect();
        items.push(Ok(Fragment::done(Some(GenerationStats {
            total_duration: 1_200_000_000,
            load_duration: 50_000_000,
            prompt_eval_count: 12,
            eval_count: 34,
        }))));
        Ok(Box::pin(stream::iter(items)))
    }
}

fn test_app(runtime: CannedRuntime) -> Router {
    let config = ChatConfig {
        default_model: "codellama".to_string(),
        ..ChatConfig::default()
    };
    let state = AppState::with_runtime(Arc::new(runtime), config);
    routes::configure(state)
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn status_route_answers_ok() {
    let (status, body) = get(test_app(CannedRuntime::up(vec![])), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn health_reports_healthy_with_model_count() {
    let (status, body) = get(test_app(CannedRuntime::up(vec![])), "/api/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["runtime_connected"], true);
    assert_eq!(json["models_available"], 2);
    assert_eq!(json["models"][0], "codellama:latest");
}

#[tokio::test]
async fn health_degrades_when_runtime_is_down() {
    let (status, body) = get(test_app(CannedRuntime::down()), "/api/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["runtime_connected"], false);
    assert_eq!(json["models_available"], 0);
}

#[tokio::test]
async fn models_route_lists_installed_models() {
    let (status, body) = get(test_app(CannedRuntime::up(vec![])), "/api/models").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    let models = json["models"].as_array().unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0]["name"], "codellama:latest");
    assert_eq!(models[0]["size"], 3_825_819_519u64);
    assert_eq!(models[0]["modified"], "2026-08-01T10:00:00Z");
    assert_eq!(models[1]["modified"], "");
}

#[tokio::test]
async fn models_route_maps_unreachable_to_503() {
    let (status, body) = get(test_app(CannedRuntime::down()), "/api/models").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn chat_without_streaming_returns_full_reply() {
    let app = test_app(CannedRuntime::up(vec!["Hello", ", world"]));
    let (status, body) = post_json(
        app,
        "/api/chat",
        json!({"message": "hi", "session_id": "s1", "stream": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["response"], "Hello, world");
    assert_eq!(json["model"], "codellama:latest");
    assert_eq!(json["session_id"], "s1");
    assert_eq!(json["stats"]["eval_count"], 34);
}

#[tokio::test]
async fn chat_streams_sse_frames_and_done_sentinel() {
    let app = test_app(CannedRuntime::up(vec!["Hel", "lo"]));
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"message": "hi", "session_id": "s1"}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("x-session-id").unwrap(), "s1");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let frames: Vec<&str> = body
        .split("\n\n")
        .filter(|frame| !frame.is_empty())
        .collect();

    assert_eq!(frames[0], r#"data: {"response":"Hel"}"#);
    assert_eq!(frames[1], r#"data: {"response":"lo"}"#);
    let done: Value =
        serde_json::from_str(frames[2].strip_prefix("data: ").unwrap()).unwrap();
    assert_eq!(done["done"], true);
    assert_eq!(done["stats"]["eval_count"], 34);
    assert_eq!(frames[3], "data: [DONE]");
}

#[tokio::test]
async fn chat_generates_a_session_id_when_absent() {
    let app = test_app(CannedRuntime::up(vec!["hi"]));
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"message": "hi"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let session_id = response
        .headers()
        .get("x-session-id")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(uuid::Uuid::parse_str(session_id).is_ok());
}

#[tokio::test]
async fn empty_message_is_a_bad_request() {
    let (status, body) = post_json(
        test_app(CannedRuntime::up(vec![])),
        "/api/chat",
        json!({"message": "   ", "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("required"));
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let (status, body) = post_json(
        test_app(CannedRuntime::up(vec![])),
        "/api/chat",
        json!({"message": "hi", "model": "gpt-5", "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("gpt-5"));
}

#[tokio::test]
async fn chat_against_a_down_runtime_is_503() {
    let (status, _) = post_json(
        test_app(CannedRuntime::down()),
        "/api/chat",
        json!({"message": "hi", "session_id": "s1", "stream": false}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn stop_without_active_generation_reports_not_active() {
    let (status, body) = post_json(
        test_app(CannedRuntime::up(vec![])),
        "/api/chat/stop",
        json!({"session_id": "nobody-home"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "not_active");
}

#[tokio::test]
async fn reset_clears_an_existing_session() {
    let app = test_app(CannedRuntime::up(vec!["hi"]));
    let (status, _) = post_json(
        app.clone(),
        "/api/chat",
        json!({"message": "hi", "session_id": "s1", "stream": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(app, "/api/chat/reset", json!({"session_id": "s1"})).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "reset");
}

#[tokio::test]
async fn reset_of_an_unknown_session_is_not_found() {
    let (status, _) = post_json(
        test_app(CannedRuntime::up(vec![])),
        "/api/chat/reset",
        json!({"session_id": "never-seen"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

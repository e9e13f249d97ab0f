use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    extract::State,
    http::{self, HeaderValue},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use ember::orchestrator::{ChatEvent, ChatRequest};

use crate::routes::errors::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatApiRequest {
    message: String,
    model: Option<String>,
    session_id: Option<String>,
    #[serde(default = "default_stream")]
    stream: bool,
}

fn default_stream() -> bool {
    true
}

pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .unwrap()
    }
}

/// Send one `data:` line. A failed send means the client went away:
/// cancel the generation and report the disconnect.
async fn send_event(
    payload: &Value,
    tx: &mpsc::Sender<String>,
    cancel_token: &CancellationToken,
) -> bool {
    if tx.send(format!("data: {payload}\n\n")).await.is_err() {
        tracing::info!("client disconnected - cancelling generation");
        cancel_token.cancel();
        return false;
    }
    true
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatApiRequest>,
) -> Result<axum::response::Response, ErrorResponse> {
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (cancel_id, cancel) = state.register_cancellation(&session_id).await;
    let chat_request = ChatRequest {
        message: request.message,
        model: request.model,
        session_id: session_id.clone(),
    };

    let stream = match state.orchestrator.chat(chat_request, cancel.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            state.remove_cancellation(&session_id, cancel_id).await;
            return Err(e.into());
        }
    };

    if !request.stream {
        return collect_reply(state, stream, session_id, cancel_id).await;
    }

    let (tx, rx) = mpsc::channel(100);
    let task_state = state.clone();
    let task_session = session_id.clone();

    drop(tokio::spawn(async move {
        let mut source = stream;
        let mut client_connected = true;
        while let Some(event) = source.next().await {
            let payload = match event {
                Ok(ChatEvent::Fragment(text)) => json!({ "response": text }),
                Ok(ChatEvent::Done { stats, .. }) => json!({ "done": true, "stats": stats }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            if client_connected && !send_event(&payload, &tx, &cancel).await {
                // Keep draining so the orchestrator reaches its
                // terminal state and releases the session slot.
                client_connected = false;
            }
        }
        if client_connected {
            let _ = tx.send("data: [DONE]\n\n".to_string()).await;
        }
        task_state.remove_cancellation(&task_session, cancel_id).await;
    }));

    let mut response = SseResponse::new(ReceiverStream::new(rx)).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert("x-session-id", value);
    }
    Ok(response)
}

async fn collect_reply(
    state: Arc<AppState>,
    mut stream: ember::orchestrator::ChatStream,
    session_id: String,
    cancel_id: u64,
) -> Result<axum::response::Response, ErrorResponse> {
    let mut text = String::new();
    let mut model = String::new();
    let mut stats = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(ChatEvent::Fragment(fragment)) => text.push_str(&fragment),
            Ok(ChatEvent::Done {
                model: m,
                stats: s,
            }) => {
                model = m;
                stats = s;
            }
            Err(e) => {
                state.remove_cancellation(&session_id, cancel_id).await;
                return Err(e.into());
            }
        }
    }
    state.remove_cancellation(&session_id, cancel_id).await;

    Ok(Json(json!({
        "response": text,
        "model": model,
        "session_id": session_id,
        "stats": stats,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SessionActionRequest {
    session_id: String,
}

pub async fn stop_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionActionRequest>,
) -> Json<Value> {
    tracing::info!(session_id = %request.session_id, "cancelling generation");
    if state.cancel_session(&request.session_id).await {
        Json(json!({
            "status": "cancelled",
            "session_id": request.session_id
        }))
    } else {
        // The generation may simply have finished already.
        Json(json!({
            "status": "not_active",
            "session_id": request.session_id
        }))
    }
}

pub async fn reset_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionActionRequest>,
) -> Result<Json<Value>, ErrorResponse> {
    if state.sessions.reset(&request.session_id).await {
        Ok(Json(json!({
            "status": "reset",
            "session_id": request.session_id
        })))
    } else {
        Err(ErrorResponse::new(
            http::StatusCode::NOT_FOUND,
            format!("Unknown session '{}'", request.session_id),
        ))
    }
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stop", post(stop_chat))
        .route("/api/chat/reset", post(reset_chat))
        .with_state(state)
}

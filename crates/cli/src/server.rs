//! WebSocket chat transport and health endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderValue, Method};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use runtime::{Backend, Event, EventSink, Orchestrator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Browser origins allowed to open the chat socket.
const DEV_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

/// Shared state for every connection.
pub struct AppState<B> {
    orchestrator: Arc<Orchestrator<B>>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub tools_count: usize,
    pub tools: Vec<String>,
}

/// Why an inbound frame was rejected. The display text is sent back verbatim.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Empty message")]
    Empty,
}

/// Extract the user text from a `{"type":"user_message","content":...}` frame.
pub fn parse_client_frame(raw: &str) -> std::result::Result<String, FrameError> {
    let frame: Value = serde_json::from_str(raw).map_err(|_| FrameError::InvalidJson)?;

    match frame.get("type") {
        Some(Value::String(kind)) if kind == "user_message" => {}
        Some(Value::String(kind)) => return Err(FrameError::UnknownType(kind.clone())),
        Some(other) => return Err(FrameError::UnknownType(other.to_string())),
        None => return Err(FrameError::UnknownType("null".into())),
    }

    let content = frame
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();
    if content.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(content.to_string())
}

/// Build the HTTP router.
pub fn router<B: Backend + 'static>(orchestrator: Arc<Orchestrator<B>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(DEV_ORIGINS.map(HeaderValue::from_static))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::<B>))
        .route("/ws/chat", get(ws_chat::<B>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { orchestrator })
}

/// Serve until Ctrl-C.
pub async fn serve<B: Backend + 'static>(
    orchestrator: Arc<Orchestrator<B>>,
    bind: &str,
) -> Result<()> {
    let listener = TcpListener::bind(bind).await.map_err(|source| Error::Bind {
        addr: bind.to_string(),
        source,
    })?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn health<B: Backend + 'static>(State(state): State<AppState<B>>) -> Json<HealthResponse> {
    let tools: Vec<String> = state
        .orchestrator
        .tools()
        .capabilities()
        .iter()
        .map(|c| c.exposed_name.clone())
        .collect();
    Json(HealthResponse {
        status: "ok".to_string(),
        tools_count: tools.len(),
        tools,
    })
}

async fn ws_chat<B: Backend + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<B>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.orchestrator))
}

/// One conversation per connection.
///
/// A reader task turns frames into turn requests, a writer task serializes
/// events onto the socket, and this task runs turns one at a time. Whichever
/// side sees the client go away cancels the token, which also drops any
/// in-flight turn.
async fn handle_socket<B: Backend + 'static>(
    socket: WebSocket,
    orchestrator: Arc<Orchestrator<B>>,
) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let (frame_tx, mut frame_rx) =
        mpsc::unbounded_channel::<std::result::Result<String, FrameError>>();

    tracing::debug!(%connection_id, "websocket connection established");

    let writer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            while let Some(event) = event_rx.recv().await {
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize event");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            cancel.cancel();
        }
    });

    let reader = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = receiver.next() => next,
                };
                let parsed = match next {
                    Some(Ok(WsMessage::Text(text))) => parse_client_frame(text.as_str()),
                    Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => parse_client_frame(text),
                        Err(_) => Err(FrameError::InvalidJson),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket receive failed");
                        break;
                    }
                };
                if frame_tx.send(parsed).is_err() {
                    break;
                }
            }
            cancel.cancel();
        }
    });

    let mut history = Vec::new();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = frame_rx.recv() => next,
        };
        let Some(frame) = next else { break };

        let content = match frame {
            Ok(content) => content,
            Err(rejected) => {
                tracing::debug!(%connection_id, reason = %rejected, "rejected frame");
                event_tx.emit(Event::error(rejected.to_string())).await;
                continue;
            }
        };

        tracing::info!(%connection_id, chars = content.len(), "turn started");
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(%connection_id, "client went away mid-turn");
                break;
            }
            result = orchestrator.run(&content, &mut history, &event_tx) => {
                if let Err(e) = result {
                    tracing::warn!(%connection_id, error = %e, "turn ended without an answer");
                }
            }
        }
    }

    cancel.cancel();
    drop(event_tx);
    let _ = reader.await;
    let _ = writer.await;
    tracing::debug!(%connection_id, "websocket connection closed");
}

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::TrackerError;
use crate::poller::SharedTracker;

#[derive(Clone)]
pub struct FeedState {
    pub tracker: SharedTracker,
    pub push_interval: Duration,
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match self {
            TrackerError::AlreadyRunning | TrackerError::NotRunning => StatusCode::CONFLICT,
            TrackerError::InvalidConfig(_) | TrackerError::InvalidUpdate(_) => StatusCode::BAD_REQUEST,
            TrackerError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: FeedState) -> Router {
    Router::new()
        .route("/snapshot", get(snapshot_handler))
        .route("/ws", get(ws_handler))
        .route("/session/start", post(start_session_handler))
        .route("/session/stop", post(stop_session_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_dashboard(state: FeedState, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("Feed server listening on http://{}", addr);
    axum::serve(listener, router(state)).await
}

async fn snapshot_handler(State(state): State<FeedState>) -> impl IntoResponse {
    Json(state.tracker.lock().await.snapshot())
}

async fn start_session_handler(State(state): State<FeedState>) -> Result<StatusCode, TrackerError> {
    state.tracker.lock().await.start_session(Utc::now())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_session_handler(State(state): State<FeedState>) -> Result<impl IntoResponse, TrackerError> {
    let summary = state.tracker.lock().await.stop_session()?;
    Ok(Json(summary))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<FeedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: FeedState) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = interval(state.push_interval);
    let mut last_sent = String::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = state.tracker.lock().await.snapshot();
                let json = match serde_json::to_string(&snapshot) {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("Failed to encode snapshot: {}", e);
                        break;
                    }
                };
                if json == last_sent {
                    continue;
                }
                if sender.send(Message::Text(json.clone())).await.is_err() {
                    // Client disconnected
                    break;
                }
                last_sent = json;
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    log::debug!("Feed client disconnected");
}

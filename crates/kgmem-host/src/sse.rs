//! Axum router serving the host over SSE: `GET /sse` opens a stream whose first event
//! names the POST endpoint, replies arrive as `message` events.

use crate::host::GraphHost;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SseState {
    pub host: Arc<GraphHost>,
    sessions: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl SseState {
    pub fn new(host: Arc<GraphHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Open SSE streams.
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn sender(&self, session_id: &str) -> Option<mpsc::UnboundedSender<String>> {
        self.sessions.read().ok()?.get(session_id).cloned()
    }
}

pub fn router(state: Arc<SseState>) -> Router {
    Router::new()
        .route("/sse", get(handle_sse))
        .route("/messages", post(handle_message))
        .route("/messages/", post(handle_message))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Removes the session when its stream is dropped (client went away).
struct SessionGuard {
    state: Arc<SseState>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.state.sessions.write() {
            sessions.remove(&self.id);
        }
        debug!(session = %self.id, "sse session closed");
    }
}

async fn handle_sse(
    State(state): State<Arc<SseState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4().simple().to_string();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    if let Ok(mut sessions) = state.sessions.write() {
        sessions.insert(id.clone(), tx);
    }
    info!(session = %id, "sse session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages/?session_id={}", id));
    let guard = SessionGuard {
        state: Arc::clone(&state),
        id,
    };
    let messages = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let frame = rx.recv().await?;
        Some((Ok(Event::default().event("message").data(frame)), (rx, guard)))
    });
    Sse::new(stream::once(async move { Ok(endpoint) }).chain(messages))
        .keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn handle_message(
    State(state): State<Arc<SseState>>,
    Query(q): Query<MessageQuery>,
    body: String,
) -> (StatusCode, &'static str) {
    let Some(tx) = state.sender(&q.session_id) else {
        warn!(session = %q.session_id, "message for unknown session");
        return (StatusCode::NOT_FOUND, "Could not find session");
    };
    if serde_json::from_str::<serde_json::Value>(&body).is_err() {
        return (StatusCode::BAD_REQUEST, "Could not parse message");
    }
    let host = Arc::clone(&state.host);
    tokio::spawn(async move {
        if let Some(reply) = host.handle_frame(&body).await {
            if tx.send(reply).is_err() {
                debug!("sse stream gone before reply");
            }
        }
    });
    (StatusCode::ACCEPTED, "Accepted")
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

//! WebSocket handling

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use casabot_api_types::{ClientMessage, ServerMessage};

use crate::AppState;
use crate::cycle::run_cycle;
use crate::registry;

const OUTBOUND_CAPACITY: usize = 64;
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// GET /api/ws — upgrade and run one chat session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session_id, mut closed) = registry::lock(&state.registry).create(Instant::now());
    info!(session_id = %session_id, "websocket connected");

    if let Err(e) = state.db.create_conversation(&session_id) {
        error!(session_id = %session_id, "failed to create conversation: {e:#}");
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize message: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!("websocket send failed, client disconnected");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let _ = outbound_tx
        .send(ServerMessage::session_start(session_id.clone()))
        .await;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, "websocket error: {e}");
                        break;
                    }
                };
                handle_client_text(&state, &session_id, text.as_str(), &outbound_tx, &closed).await;
            }
            _ = closed.changed() => {
                info!(session_id = %session_id, "session closed after inactivity");
                break;
            }
        }
    }

    registry::lock(&state.registry).remove(&session_id);
    drop(outbound_tx);
    // Queued frames get a second to flush.
    let writer = send_task.abort_handle();
    if tokio::time::timeout(WRITER_GRACE, send_task).await.is_err() {
        writer.abort();
    }
    info!(session_id = %session_id, "websocket disconnected");
}

async fn handle_client_text(
    state: &AppState,
    session_id: &str,
    text: &str,
    outbound: &mpsc::Sender<ServerMessage>,
    closed: &watch::Receiver<bool>,
) {
    registry::lock(&state.registry).touch(session_id, Instant::now());

    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(session_id = %session_id, "ignoring malformed message: {e}");
            return;
        }
    };

    match msg {
        ClientMessage::Ping => {
            let _ = outbound.send(ServerMessage::Pong).await;
        }
        ClientMessage::UserMessage { content } => {
            let content = content.trim();
            if content.is_empty() {
                debug!(session_id = %session_id, "ignoring empty user message");
                return;
            }
            let started = registry::lock(&state.registry).try_begin_cycle(session_id);
            if !started {
                debug!(session_id = %session_id, "dropping message while a reply is in flight");
                return;
            }
            tokio::spawn(run_cycle(
                state.clone(),
                session_id.to_string(),
                content.to_string(),
                outbound.clone(),
                closed.clone(),
            ));
        }
    }
}

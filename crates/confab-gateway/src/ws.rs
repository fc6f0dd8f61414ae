//! WebSocket endpoint.
//!
//! One connection = one session = one task. The upgrade path checks the
//! origin allowlist, takes a single rate-limit ticket, and resolves the
//! identity from the trusted header. After the upgrade, a writer task
//! drains the update channel into the socket while the read loop feeds
//! frames to the pipeline in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use confab_auth::identity::{resolve_identity, IDENTITY_HEADER};
use confab_core::{ClientFrame, ServerFrame};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{EventPayload, SessionEvent};
use crate::state::AppState;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if let Err(e) = state.origins.check(origin) {
        warn!(%addr, "rejected websocket: {e}");
        return (StatusCode::FORBIDDEN, e.to_string()).into_response();
    }

    // Advisory: one ticket per upgrade.
    if let Err(e) = state.limiter.check(&addr.ip().to_string(), "/ws") {
        return (StatusCode::TOO_MANY_REQUESTS, e.to_string()).into_response();
    }

    let header_identity = headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok());
    let user = match resolve_identity(
        header_identity,
        state.settings.debug,
        &state.settings.debug_user,
    ) {
        Ok(user) => user,
        Err(e) => return (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, user))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket, user: String) {
    let session = state.sessions.connect(&user).await;
    let session_id = session.lock().await.id.clone();
    state
        .events
        .emit(
            SessionEvent::SessionStarted,
            EventPayload {
                session_id: session_id.clone(),
                user: user.clone(),
                data: json!({}),
            },
        )
        .await;

    let (mut sink, mut stream) = socket.split();
    let (updates, mut outbox) = mpsc::unbounded_channel::<ServerFrame>();

    // Writer task: serializes frames in emission order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("dropping unserializable frame: {e}");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                debug!("client write failed, stopping writer");
                break;
            }
        }
    });

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => {
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        let mut session = session.lock().await;
                        state.pipeline.handle_frame(&mut session, frame, &updates).await;
                    }
                    Err(e) => {
                        debug!(user = %user, "malformed frame: {e}");
                        state.pipeline.handle_malformed(&e.to_string(), &updates);
                    }
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {} // ping/pong/binary ignored
        }
    }

    // Abandon any in-flight emission and tear down.
    drop(updates);
    writer.abort();
    state
        .events
        .emit(
            SessionEvent::SessionEnded,
            EventPayload {
                session_id: session_id.clone(),
                user: user.clone(),
                data: json!({}),
            },
        )
        .await;
    state.sessions.disconnect(&session_id).await;
    info!(user = %user, session_id = %session_id, "connection closed");
}

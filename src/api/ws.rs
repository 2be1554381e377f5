// =============================================================================
// WebSocket Handler — live alert feed
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive:
//   1. An immediate full StateSnapshot on connect.
//   2. Every AlertEvent as the monitor emits it, tagged `"type": "alert"`.
//
// A client that falls behind the broadcast buffer is sent a fresh snapshot
// instead of the alerts it missed.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::alerts::AlertEvent;
use crate::api::auth::validate_token;
use crate::app_state::{AppState, StateSnapshot};

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Outbound frame envelope.
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum Frame<'a> {
    Snapshot(&'a StateSnapshot),
    Alert(&'a AlertEvent),
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (
            axum::http::StatusCode::FORBIDDEN,
            "Invalid or missing token",
        )
            .into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

// =============================================================================
// Connection handler
// =============================================================================

/// Forward alerts until the client goes away.
///
/// Subscribes before the initial snapshot so an alert emitted in between is
/// not lost.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let mut alerts = state.subscribe_alerts();
    let (mut sender, mut receiver) = socket.split();

    let snapshot = state.build_snapshot();
    if let Err(e) = send_frame(&mut sender, &Frame::Snapshot(&snapshot)).await {
        warn!(error = %e, "Failed to send initial WebSocket snapshot");
        return;
    }

    loop {
        tokio::select! {
            event = alerts.recv() => {
                let sent = match event {
                    Ok(event) => send_frame(&mut sender, &Frame::Alert(&event)).await,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "WebSocket client lagged — resending snapshot");
                        let snapshot = state.build_snapshot();
                        send_frame(&mut sender, &Frame::Snapshot(&snapshot)).await
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = sent {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    // Text, binary and pong frames carry nothing we act on.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn send_frame<S>(sender: &mut S, frame: &Frame<'_>) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialize WebSocket frame");
            Ok(())
        }
    }
}

//! WebSocket audio ingress: `/u/<call_uuid>`, binary frames are 20 ms μ-law
//! payloads, the text frame `"{}"` is a liveness probe.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::state::AppState;

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(call_uuid): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, call_uuid))
}

async fn handle_socket(socket: WebSocket, state: AppState, call_uuid: String) {
    info!(call_id = %call_uuid, "audio websocket connected");
    let (mut sender, mut receiver) = socket.split();
    let mut frames: u64 = 0;
    let mut unknown_call_warned = false;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Binary(payload)) => {
                frames += 1;
                if frames == 1 || frames.is_multiple_of(500) {
                    debug!(call_id = %call_uuid, frames, "audio frames received");
                }
                match state.registry.get(&call_uuid) {
                    Some(session) => session.push_audio(payload.to_vec()),
                    None => {
                        if !unknown_call_warned {
                            warn!(call_id = %call_uuid, "audio for unknown call");
                            unknown_call_warned = true;
                        }
                    }
                }
            }
            Ok(Message::Text(text)) => {
                // liveness probe
                if text.trim() == "{}" {
                    let _ = sender
                        .send(Message::text("{\"ok\":true}".to_string()))
                        .await;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = sender.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(call_id = %call_uuid, error = %e, "websocket error");
                break;
            }
        }
    }
    info!(call_id = %call_uuid, frames, "audio websocket disconnected");
}

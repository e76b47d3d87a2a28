//! Softswitch control channel: newline-delimited JSON frames over TCP.
//!
//! `{"op":"init", "call_id":"...", "caller_number":"...", ...}` sets a call
//! up; `hangup` and `transfer` drive the corresponding lifecycle paths. The
//! reply is `{"ok":true}` or `{"ok":false,"error":"..."}` per frame.

use std::collections::HashMap;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::lifecycle::{self, InitParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ControlFrame {
    op: String,
    call_id: Option<String>,
    caller_number: Option<String>,
    destination_number: Option<String>,
    client_id: Option<String>,
    sip_headers: Option<HashMap<String, String>>,
}

pub async fn run_control_listener(state: AppState) -> anyhow::Result<()> {
    let port = state.settings.network.init_port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "control channel listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "control connection accepted");
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(%peer, error = %e, "control connection ended");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, state: AppState) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlFrame>(line) {
            Ok(frame) => dispatch(&state, frame).await,
            Err(e) => {
                warn!(error = %e, "unparsable control frame");
                format!(r#"{{"ok":false,"error":"bad frame: {e}"}}"#)
            }
        };
        write_half.write_all(response.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }
    Ok(())
}

async fn dispatch(state: &AppState, frame: ControlFrame) -> String {
    let call_id = frame.call_id.clone().unwrap_or_default();
    let result = match frame.op.as_str() {
        "init" => {
            lifecycle::on_init(
                state,
                InitParams {
                    call_id,
                    caller_number: frame.caller_number,
                    destination_number: frame.destination_number,
                    client_id: frame.client_id,
                    sip_headers: frame.sip_headers,
                },
            )
            .await
        }
        "hangup" => lifecycle::on_hangup(state, &call_id).await,
        "transfer" => lifecycle::on_transfer(state, &call_id).await,
        other => {
            warn!(op = other, "unknown control op");
            return format!(r#"{{"ok":false,"error":"unknown op '{other}'"}}"#);
        }
    };
    match result {
        Ok(()) => r#"{"ok":true}"#.to_string(),
        Err(e) => {
            warn!(op = %frame.op, error = %e, "control op failed");
            format!(r#"{{"ok":false,"error":"{e}"}}"#)
        }
    }
}

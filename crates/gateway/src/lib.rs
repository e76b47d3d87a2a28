pub mod clients;
pub mod error;
pub mod ingress;
pub mod lifecycle;
pub mod playback;
pub mod registry;
pub mod session;
pub mod session_log;
pub mod state;
pub mod timers;

use axum::{routing::get, Router};
use state::AppState;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/u/{call_uuid}", get(ingress::ws::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_calls": state.registry.active_count(),
        "asr_enabled": state.backend.is_some(),
    }))
}

/// Watches softswitch events: CHANNEL_HANGUP tears the matching session
/// down; playback completion is consumed by the per-call coordinators.
pub async fn run_esl_event_watcher(state: AppState) {
    let mut events = state.esl.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => {
                if event.name() == Some("CHANNEL_HANGUP")
                    && let Some(call_id) = event.get("Unique-ID")
                {
                    let call_id = call_id.to_string();
                    if state.registry.get(&call_id).is_some() {
                        info!(call_id, "softswitch reported hangup");
                        if let Err(e) = lifecycle::on_hangup(&state, &call_id).await {
                            debug!(call_id, error = %e, "hangup dispatch failed");
                        }
                    }
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event watcher lagged behind");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

//! Call lifecycle: init from the softswitch, transfer and hangup requests,
//! and the initial greeting sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use libertycall_dialogue::state::Phase;
use libertycall_dialogue::templates::resolve_audio_path;
use tracing::{info, warn};

use crate::clients::{resolve_client_id, ClientProfile};
use crate::error::GatewayError;
use crate::playback::PlayItem;
use crate::session::{spawn_session, SessionArgs, SessionEvent};
use crate::state::AppState;

/// Client whose calls open with the recorded intro (000 → 001 → 002).
const INTRO_CLIENT: &str = "001";
const INTRO_TEMPLATES: &[&str] = &["000", "001", "002"];
/// Pseudo template id for the leading silence pad.
const SILENCE_PAD_ID: &str = "__pad__";

#[derive(Debug, Clone, Default)]
pub struct InitParams {
    pub call_id: String,
    pub caller_number: Option<String>,
    pub destination_number: Option<String>,
    pub client_id: Option<String>,
    pub sip_headers: Option<HashMap<String, String>>,
}

/// Handles the softswitch init frame: resolves the client, builds the
/// session, starts recording, and queues the greeting. Duplicate inits for
/// the same call id are no-ops.
pub async fn on_init(state: &AppState, params: InitParams) -> Result<(), GatewayError> {
    let call_id = params.call_id.clone();
    if call_id.is_empty() {
        return Err(GatewayError::BadInitFrame("missing call_id".to_string()));
    }
    if !state.registry.mark_started(&call_id) {
        info!(call_id, "duplicate init ignored");
        return Ok(());
    }

    let caller_number = params
        .caller_number
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "-")
        .map(str::to_string);

    let client_id = resolve_client_id(
        &state.mapping,
        params.client_id.as_deref(),
        params.sip_headers.as_ref(),
        params.destination_number.as_deref(),
        caller_number.as_deref(),
        &state.settings.dialogue.default_client_id,
    );
    info!(
        call_id,
        client_id,
        caller = caller_number.as_deref().unwrap_or("-"),
        destination = params.destination_number.as_deref().unwrap_or("-"),
        "call init"
    );

    let profile = match ClientProfile::load(&state.settings.paths.clients_root, &client_id) {
        Ok(profile) => profile,
        Err(e) => {
            warn!(call_id, client_id, error = %e, "client profile unusable, using defaults");
            ClientProfile::fallback(&state.settings.paths.clients_root, &client_id)
        }
    };

    let initial_phase = if client_id == INTRO_CLIENT {
        Phase::Intro
    } else {
        Phase::Entry
    };

    let recording_path = state
        .settings
        .paths
        .recordings_root
        .join(format!("{call_id}.wav"));

    let session = spawn_session(SessionArgs {
        call_id: call_id.clone(),
        caller_number,
        profile: profile.clone(),
        settings: Arc::clone(&state.settings),
        esl: state.esl.clone(),
        registry: Arc::clone(&state.registry),
        backend: state.backend.clone(),
        initial_phase,
        recording_path: recording_path.clone(),
    });
    state.registry.insert(Arc::clone(&session));

    if profile.save_calls {
        let path = recording_path.display().to_string();
        match state.esl.uuid_record(&call_id, true, &path).await {
            Ok(reply) if reply.ok() => info!(call_id, path, "recording started"),
            Ok(reply) => warn!(call_id, body = %reply.body, "recording not started"),
            Err(e) => warn!(call_id, error = %e, "recording command failed"),
        }
    }

    // Greeting sequence: silence pad, then the intro templates for the intro
    // client. Other clients greet when the caller first speaks.
    let enqueue = async {
        let mut items = Vec::new();
        if state.silence_pad.exists() {
            items.push(PlayItem {
                template_id: SILENCE_PAD_ID.to_string(),
                path: state.silence_pad.clone(),
                wait_after: None,
                auto_hangup: false,
            });
        }
        if client_id == INTRO_CLIENT && state.registry.mark_intro_played(&call_id) {
            for template_id in INTRO_TEMPLATES {
                match resolve_audio_path(&profile.audio_dir, template_id) {
                    Some(path) => items.push(PlayItem {
                        template_id: (*template_id).to_string(),
                        path,
                        wait_after: None,
                        auto_hangup: false,
                    }),
                    None => warn!(call_id, template_id, "intro audio missing"),
                }
            }
        }

        if items.is_empty() {
            // nothing to play; complete the greeting phase directly so the
            // no-input timer still gets armed
            let _ = session
                .events_tx
                .send(SessionEvent::PlaybackFinished {
                    transfer_after: false,
                    auto_hangup: false,
                    greeting: true,
                })
                .await;
        } else {
            session.playback.play(items, false, true).await;
        }
    };
    let budget = Duration::from_secs_f64(state.settings.timers.initial_sequence_timeout_secs);
    if tokio::time::timeout(budget, enqueue).await.is_err() {
        warn!(call_id, "initial sequence enqueue timed out");
    }

    Ok(())
}

/// Softswitch (or operator console) asked for a hangup.
pub async fn on_hangup(state: &AppState, call_id: &str) -> Result<(), GatewayError> {
    let session = state
        .registry
        .get(call_id)
        .ok_or_else(|| GatewayError::UnknownCall(call_id.to_string()))?;
    session
        .events_tx
        .send(SessionEvent::Hangup { source: "softswitch" })
        .await
        .map_err(|_| GatewayError::UnknownCall(call_id.to_string()))?;
    Ok(())
}

/// External transfer request; routed through the TTS-gated path.
pub async fn on_transfer(state: &AppState, call_id: &str) -> Result<(), GatewayError> {
    let session = state
        .registry
        .get(call_id)
        .ok_or_else(|| GatewayError::UnknownCall(call_id.to_string()))?;
    session
        .events_tx
        .send(SessionEvent::TransferRequested)
        .await
        .map_err(|_| GatewayError::UnknownCall(call_id.to_string()))?;
    Ok(())
}

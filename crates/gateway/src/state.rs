//! Process-wide gateway state shared across transports and calls.

use std::path::PathBuf;
use std::sync::Arc;

use libertycall_asr::auth::{ServiceAccountKey, TokenProvider};
use libertycall_asr::google::GoogleStreamingBackend;
use libertycall_asr::StreamingAsrBackend;
use libertycall_config::GatewaySettings;
use libertycall_esl::{EslClient, EslConfig};
use tracing::{error, info, warn};

use crate::clients::PhoneMapping;
use crate::registry::CallRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<GatewaySettings>,
    pub esl: EslClient,
    pub registry: Arc<CallRegistry>,
    pub backend: Option<Arc<dyn StreamingAsrBackend>>,
    pub mapping: Arc<PhoneMapping>,
    /// Generated 0.5 s silence WAV broadcast ahead of the greeting.
    pub silence_pad: PathBuf,
}

impl AppState {
    pub fn new(settings: GatewaySettings) -> Self {
        let settings = Arc::new(settings);

        let esl = EslClient::connect(EslConfig {
            host: settings.esl.host.clone(),
            port: settings.esl.port,
            password: settings.esl.password.clone(),
            max_reconnect_attempts: settings.esl.max_reconnect_attempts,
            listener_restart_secs: settings.esl.listener_restart_secs,
            ..EslConfig::default()
        });

        let backend = build_backend(&settings);
        let mapping = Arc::new(PhoneMapping::load(&settings.paths.config_root));

        let silence_pad = settings.paths.recordings_root.join("silence_pad.wav");
        if let Err(e) = std::fs::create_dir_all(&settings.paths.recordings_root) {
            warn!(error = %e, "recordings directory unavailable");
        }
        if let Err(e) =
            libertycall_media::write_silence_wav(&silence_pad, settings.audio.initial_silence_secs)
        {
            warn!(error = %e, "silence pad generation failed; greeting plays without it");
        }

        Self {
            settings,
            esl,
            registry: Arc::new(CallRegistry::new()),
            backend,
            mapping,
            silence_pad,
        }
    }
}

/// Builds the streaming recognizer. Missing or unusable credentials leave
/// the gateway running with ASR disabled: calls still answer, timers still
/// drive the no-input ladder.
fn build_backend(settings: &GatewaySettings) -> Option<Arc<dyn StreamingAsrBackend>> {
    if !settings.asr.streaming_enabled {
        info!("streaming ASR disabled by configuration");
        return None;
    }
    let Some(credentials_path) = settings.asr.credentials_path.as_deref() else {
        error!("no speech credentials configured (GOOGLE_APPLICATION_CREDENTIALS / LC_GOOGLE_CREDENTIALS_PATH)");
        return None;
    };
    let key = match ServiceAccountKey::from_file(credentials_path) {
        Ok(key) => key,
        Err(e) => {
            error!(path = %credentials_path.display(), error = %e, "speech credentials unusable");
            return None;
        }
    };
    match TokenProvider::new(key) {
        Ok(tokens) => {
            info!(
                provider = %settings.asr.provider,
                project_id = settings.asr.project_id.as_deref().unwrap_or("-"),
                language = %settings.asr.language_code,
                "streaming ASR backend ready"
            );
            Some(Arc::new(GoogleStreamingBackend::new(tokens)))
        }
        Err(e) => {
            error!(error = %e, "token provider init failed");
            None
        }
    }
}

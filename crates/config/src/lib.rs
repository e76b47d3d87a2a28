use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level gateway settings.
///
/// Resolution order: built-in defaults → optional JSON file →
/// the enumerated `LC_*` environment variables. Environment always wins so a
/// deployment can flip debug knobs without touching the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub network: NetworkSettings,
    pub esl: EslSettings,
    pub paths: PathSettings,
    pub asr: AsrSettings,
    pub audio: AudioSettings,
    pub timers: TimerSettings,
    pub dialogue: DialogueSettings,
    /// Write pipeline audio to per-call debug WAVs (`LC_DEBUG_SAVE_WAV=1`).
    pub debug_save_wav: bool,
    /// Skip the hangup timer and kill immediately (`LC_FORCE_IMMEDIATE_HANGUP=1`).
    pub force_immediate_hangup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// UDP port the RTP receiver binds on 0.0.0.0.
    pub rtp_port: u16,
    /// WebSocket audio ingress port (`/u/<uuid>`).
    pub ws_port: u16,
    /// TCP port for the softswitch init channel (JSON frames).
    pub init_port: u16,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            rtp_port: 40000,
            ws_port: 9001,
            init_port: 8085,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EslSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Reconnect attempts per operation before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the event listener restarts after a crash.
    pub listener_restart_secs: f64,
}

impl Default for EslSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8021,
            password: "ClueCon".to_string(),
            max_reconnect_attempts: 3,
            listener_restart_secs: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Per-client directories: `<clients_root>/<client_id>/{audio,config}`.
    pub clients_root: PathBuf,
    /// Process-wide config files (phone_mapping.json etc.).
    pub config_root: PathBuf,
    /// Session artifact root: `<sessions_root>/<date>/<client>/session_*`.
    pub sessions_root: PathBuf,
    /// Softswitch RTP info files (`rtp_info_*.txt`).
    pub rtp_info_dir: PathBuf,
    /// Per-call recording target directory.
    pub recordings_root: PathBuf,
    /// Debug WAV dump directory.
    pub debug_audio_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            clients_root: PathBuf::from("/opt/libertycall/clients"),
            config_root: PathBuf::from("/opt/libertycall/config"),
            sessions_root: PathBuf::from("/var/lib/libertycall/sessions"),
            rtp_info_dir: PathBuf::from("/tmp"),
            recordings_root: PathBuf::from("/var/lib/libertycall/recordings"),
            debug_audio_dir: PathBuf::from("/opt/libertycall/debug_audio"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrSettings {
    /// Streaming provider. Only "google" is supported.
    pub provider: String,
    pub streaming_enabled: bool,
    pub project_id: Option<String>,
    /// Service-account JSON path. `GOOGLE_APPLICATION_CREDENTIALS` and
    /// `LC_GOOGLE_CREDENTIALS_PATH` override this, in that order.
    pub credentials_path: Option<PathBuf>,
    pub language_code: String,
    /// Extra phrase hints merged with the built-in telephony set.
    pub phrase_hints: Vec<String>,
    /// Bounded audio queue depth (20 ms chunks; 500 ≈ 10 s of audio).
    pub queue_capacity: usize,
    /// Audio buffered before the stream worker starts.
    pub pre_stream_buffer_secs: f64,
    /// Warmup silence sent when a stream opens.
    pub warmup_silence_secs: f64,
    /// Cumulative empty-queue wait before a keepalive frame is sent.
    pub keepalive_interval_secs: f64,
    /// Worker join timeout after the close sentinel.
    pub close_join_secs: f64,
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            streaming_enabled: true,
            project_id: None,
            credentials_path: None,
            language_code: "ja-JP".to_string(),
            phrase_hints: Vec::new(),
            queue_capacity: 500,
            pre_stream_buffer_secs: 0.3,
            warmup_silence_secs: 0.2,
            keepalive_interval_secs: 1.0,
            close_join_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Normalized RMS above which a frame counts as caller speech.
    pub barge_in_threshold: f32,
    /// Normalized RMS below which a frame counts as silent.
    pub silence_threshold: f32,
    /// Spectral noise gate on the 8 kHz path.
    pub noise_suppression: bool,
    /// Silence pad queued ahead of the greeting sequence.
    pub initial_silence_secs: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            barge_in_threshold: 0.005,
            silence_threshold: 0.005,
            noise_suppression: true,
            initial_silence_secs: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// Seconds without a voiced frame before the no-input ladder arms.
    pub silence_arm_secs: f64,
    /// Interval between no-input ladder rungs once armed.
    pub no_input_timeout_secs: f64,
    /// Accumulated no-input seconds that force a hangup regardless of rung.
    pub max_no_input_secs: f64,
    pub no_input_streak_limit: u32,
    /// One backchannel per silence episode after this much quiet.
    pub backchannel_silence_secs: f64,
    pub playback_watchdog_secs: f64,
    pub duplicate_play_window_secs: f64,
    /// Budget for loading the initial greeting sequence.
    pub initial_sequence_timeout_secs: f64,
    /// Hangup delay after the closing pair 086/087 or HANDOFF_NO.
    pub close_hangup_delay_secs: f64,
    /// Hangup delay after the "112" give-up template finishes.
    pub give_up_hangup_delay_secs: f64,
    pub session_retention_days: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            silence_arm_secs: 2.0,
            no_input_timeout_secs: 10.0,
            max_no_input_secs: 60.0,
            no_input_streak_limit: 3,
            backchannel_silence_secs: 2.0,
            playback_watchdog_secs: 10.0,
            duplicate_play_window_secs: 10.0,
            initial_sequence_timeout_secs: 3.0,
            close_hangup_delay_secs: 60.0,
            give_up_hangup_delay_secs: 2.0,
            session_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueSettings {
    pub default_client_id: String,
    /// Substitute when a template WAV is missing.
    pub fallback_template: String,
    /// Stale partial-transcript GC horizon.
    pub partial_max_age_secs: f64,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            default_client_id: "000".to_string(),
            fallback_template: "001".to_string(),
            partial_max_age_secs: 30.0,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            network: NetworkSettings::default(),
            esl: EslSettings::default(),
            paths: PathSettings::default(),
            asr: AsrSettings::default(),
            audio: AudioSettings::default(),
            timers: TimerSettings::default(),
            dialogue: DialogueSettings::default(),
            debug_save_wav: false,
            force_immediate_hangup: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("config load failed: {0}")]
    Load(#[from] config::ConfigError),
    #[error("unsupported ASR provider '{0}' (only \"google\" is supported)")]
    UnsupportedProvider(String),
}

impl GatewaySettings {
    /// Loads settings from an optional JSON file, then applies `LC_*` env
    /// overrides. Missing file is not an error when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let mut settings: GatewaySettings = match path {
            Some(_) => builder.build()?.try_deserialize()?,
            None => GatewaySettings::default(),
        };
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.asr.provider != "google" {
            return Err(SettingsError::UnsupportedProvider(
                self.asr.provider.clone(),
            ));
        }
        Ok(())
    }

    /// Applies the enumerated environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("LC_ASR_PROVIDER")
            && !v.is_empty()
        {
            self.asr.provider = v;
        }
        if let Ok(v) = std::env::var("LC_ASR_STREAMING_ENABLED") {
            self.asr.streaming_enabled = v == "1";
        }
        if let Ok(v) = std::env::var("LC_GOOGLE_PROJECT_ID")
            && !v.is_empty()
        {
            self.asr.project_id = Some(v);
        }
        // GOOGLE_APPLICATION_CREDENTIALS takes precedence over the LC_ alias.
        if let Ok(v) = std::env::var("LC_GOOGLE_CREDENTIALS_PATH")
            && !v.is_empty()
        {
            self.asr.credentials_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
            && !v.is_empty()
        {
            self.asr.credentials_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("LC_ASR_PHRASE_HINTS") {
            self.asr.phrase_hints = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(v) = std::env::var("LC_FORCE_IMMEDIATE_HANGUP") {
            self.force_immediate_hangup = v == "1";
        }
        if let Ok(v) = std::env::var("LC_DEBUG_SAVE_WAV") {
            self.debug_save_wav = v == "1";
        }
    }
}

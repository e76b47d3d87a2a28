//! In-process gateway wired against the mock switch, with a seeded client
//! directory so template audio resolution works.

use std::sync::Arc;
use std::time::Duration;

use libertycall_config::GatewaySettings;
use libertycall_gateway::lifecycle::{self, InitParams};
use libertycall_gateway::session::{SessionEvent, SessionHandle};
use libertycall_gateway::state::AppState;
use tempfile::TempDir;

use super::mock_switch::MockSwitch;

/// Every template the scenarios can touch gets a stub WAV.
const STUB_TEMPLATES: &[&str] = &[
    "000", "001", "002", "003", "004", "005", "006", "010", "013", "023", "040", "060", "061",
    "062", "069", "081", "082", "083", "085", "086", "087", "088", "089", "090", "093", "094",
    "104", "110", "111", "112", "0602", "0604", "0605",
];

pub struct TestGateway {
    pub state: AppState,
    pub switch: MockSwitch,
    _root: TempDir,
}

impl TestGateway {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(tweak: impl FnOnce(&mut GatewaySettings)) -> Self {
        let switch = MockSwitch::spawn().await;
        let root = TempDir::new().expect("tempdir");

        let mut settings = GatewaySettings::default();
        settings.esl.host = switch.addr.ip().to_string();
        settings.esl.port = switch.addr.port();
        settings.asr.streaming_enabled = false; // transcripts are injected
        settings.paths.clients_root = root.path().join("clients");
        settings.paths.config_root = root.path().join("config");
        settings.paths.sessions_root = root.path().join("sessions");
        settings.paths.recordings_root = root.path().join("recordings");
        settings.paths.rtp_info_dir = root.path().join("rtp");
        settings.paths.debug_audio_dir = root.path().join("debug");
        settings.audio.initial_silence_secs = 0.1;
        // keep the suite fast; individual tests tighten further
        settings.timers.no_input_timeout_secs = 5.0;
        settings.timers.close_hangup_delay_secs = 0.4;
        settings.timers.give_up_hangup_delay_secs = 0.3;
        settings.timers.playback_watchdog_secs = 2.0;
        tweak(&mut settings);

        seed_client(&settings, "000");
        let state = AppState::new(settings);
        Self {
            state,
            switch,
            _root: root,
        }
    }

    pub async fn init_call(&self, call_id: &str) -> anyhow::Result<()> {
        lifecycle::on_init(
            &self.state,
            InitParams {
                call_id: call_id.to_string(),
                caller_number: Some("09012345678".to_string()),
                destination_number: None,
                client_id: Some("000".to_string()),
                sip_headers: None,
            },
        )
        .await?;
        // let the greeting pad complete so the session is in steady state
        assert!(
            self.switch
                .wait_for("uuid_broadcast", Duration::from_secs(2))
                .await,
            "greeting pad never played"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    pub fn session(&self, call_id: &str) -> Arc<SessionHandle> {
        self.state
            .registry
            .get(call_id)
            .expect("session not registered")
    }

    /// Injects a final transcript as if the recognizer produced it.
    pub async fn speak(&self, call_id: &str, text: &str) {
        let session = self.session(call_id);
        session
            .events_tx
            .send(SessionEvent::Transcript {
                text: text.to_string(),
                is_final: true,
                confidence: Some(0.92),
            })
            .await
            .expect("session mailbox closed");
    }

    pub async fn partial(&self, call_id: &str, text: &str) {
        let session = self.session(call_id);
        session
            .events_tx
            .send(SessionEvent::Transcript {
                text: text.to_string(),
                is_final: false,
                confidence: None,
            })
            .await
            .expect("session mailbox closed");
    }
}

fn seed_client(settings: &GatewaySettings, client_id: &str) {
    let base = settings.paths.clients_root.join(client_id);
    let audio = base.join("audio");
    let config = base.join("config");
    std::fs::create_dir_all(&audio).unwrap();
    std::fs::create_dir_all(&config).unwrap();

    for id in STUB_TEMPLATES {
        // 44-byte header + 0.1 s of 8 kHz payload; duration estimate floors
        // at 0.5 s but completion events finish playback instantly
        std::fs::write(audio.join(format!("{id}.wav")), vec![0u8; 44 + 1600]).unwrap();
    }

    std::fs::write(
        config.join("client.json"),
        serde_json::json!({
            "client_name": "Test Client",
            "transfer_number": "08024152649",
            "caller_id_number": "58304073",
            "caller_id_name": "LibertyCall"
        })
        .to_string(),
    )
    .unwrap();

    // trim the long post-playback waits so tests stay quick
    std::fs::write(
        config.join("templates.json"),
        serde_json::json!({
            "006": {"wait_time_after": 0.05},
            "110": {"wait_time_after": 0.05},
            "111": {"wait_time_after": 0.05},
            "112": {"wait_time_after": 0.05}
        })
        .to_string(),
    )
    .unwrap();
}

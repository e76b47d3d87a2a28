//! Per-call session actor.
//!
//! One task owns the ConversationState and serializes everything that can
//! mutate it: transcripts, timer ticks, playback completions, transfer and
//! hangup requests. The audio path runs in its own task and communicates
//! through the mailbox, so RTP ingestion is never blocked by dialogue work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use libertycall_asr::worker::{AsrEvent, AsrStreamWorker, WorkerConfig};
use libertycall_asr::StreamingAsrBackend;
use libertycall_config::GatewaySettings;
use libertycall_dialogue::engine::{AutoHangup, DialogueEngine, Reply};
use libertycall_dialogue::intent::normalize_text;
use libertycall_dialogue::state::{ConversationState, HandoffState, Phase};
use libertycall_dialogue::templates::resolve_audio_path;
use libertycall_esl::EslClient;
use libertycall_media::{AudioPipeline, PipelineConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clients::ClientProfile;
use crate::playback::{PlayItem, PlaybackConfig, PlaybackHandle, PlaybackStatus};
use crate::registry::CallRegistry;
use crate::session_log::SessionLogger;
use crate::timers::TimerSet;

/// Backchannel vocabulary: short acknowledgements worth an immediate "はい".
const BACKCHANNEL_TRIGGERS: &[&str] = &["はい", "えっと", "あの", "ええ", "そう", "うん", "ああ"];
/// Template played as the backchannel nudge.
const BACKCHANNEL_TEMPLATE: &str = "003";
/// One-character finals that still mean "I said something".
const AMBIGUOUS_VOWELS: &[&str] = &["あ", "ん", "え", "お", "う", "い"];
/// Recognizer filler phrases that repeat when the line is actually quiet.
const HALLUCINATION_WORDS: &[&str] =
    &["おかげで", "ご視聴", "字幕", "チャンネル登録", "おやすみなさい"];
const MIN_TEXT_CHARS_FOR_INTENT: usize = 2;

/// Everything that can reach the session actor.
#[derive(Debug)]
pub enum SessionEvent {
    Transcript {
        text: String,
        is_final: bool,
        confidence: Option<f64>,
    },
    AsrFailed {
        message: String,
        permanent: bool,
    },
    BargeIn,
    BackchannelDue,
    SilenceTick,
    PlaybackFinished {
        transfer_after: bool,
        auto_hangup: bool,
        greeting: bool,
    },
    TransferRequested,
    HangupTimer,
    Hangup {
        source: &'static str,
    },
}

/// Shared, registry-held view of a live call.
pub struct SessionHandle {
    pub call_id: String,
    pub client_id: String,
    pub events_tx: mpsc::Sender<SessionEvent>,
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub status: Arc<PlaybackStatus>,
    pub playback: PlaybackHandle,
    pub last_voice_at: Arc<parking_lot::Mutex<Option<Instant>>>,
}

impl SessionHandle {
    /// Non-blocking audio delivery: a congested call drops frames rather
    /// than stalling the UDP reader.
    pub fn push_audio(&self, payload: Vec<u8>) {
        if self.audio_tx.try_send(payload).is_err() {
            warn!(call_id = %self.call_id, "audio channel full, dropping frame");
        }
    }
}

pub struct SessionArgs {
    pub call_id: String,
    pub caller_number: Option<String>,
    pub profile: ClientProfile,
    pub settings: Arc<GatewaySettings>,
    pub esl: EslClient,
    pub registry: Arc<CallRegistry>,
    pub backend: Option<Arc<dyn StreamingAsrBackend>>,
    pub initial_phase: Phase,
    pub recording_path: std::path::PathBuf,
}

/// Builds the per-call task set and returns the registry handle.
pub fn spawn_session(args: SessionArgs) -> Arc<SessionHandle> {
    let status = Arc::new(PlaybackStatus::default());
    let last_voice_at = Arc::new(parking_lot::Mutex::new(None));
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);
    let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(512);

    let playback = crate::playback::spawn_playback_coordinator(
        args.call_id.clone(),
        args.esl.clone(),
        Arc::clone(&status),
        events_tx.clone(),
        PlaybackConfig {
            watchdog_secs: args.settings.timers.playback_watchdog_secs,
            duplicate_window_secs: args.settings.timers.duplicate_play_window_secs,
        },
    );

    let handle = Arc::new(SessionHandle {
        call_id: args.call_id.clone(),
        client_id: args.profile.client_id.clone(),
        events_tx: events_tx.clone(),
        audio_tx,
        status: Arc::clone(&status),
        playback: playback.clone(),
        last_voice_at: Arc::clone(&last_voice_at),
    });

    spawn_audio_task(
        &args,
        audio_rx,
        events_tx.clone(),
        Arc::clone(&status),
        Arc::clone(&last_voice_at),
    );

    let actor = SessionActor::new(args, playback, status, events_tx, last_voice_at);
    tokio::spawn(actor.run(events_rx));

    handle
}

fn spawn_audio_task(
    args: &SessionArgs,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    events_tx: mpsc::Sender<SessionEvent>,
    status: Arc<PlaybackStatus>,
    last_voice_at: Arc<parking_lot::Mutex<Option<Instant>>>,
) {
    let call_id = args.call_id.clone();
    let settings = Arc::clone(&args.settings);
    let backend = args.backend.clone();
    let debug_wav = settings.debug_save_wav.then(|| {
        settings
            .paths
            .debug_audio_dir
            .join(format!("call_{call_id}.wav"))
    });

    let (asr_events_tx, mut asr_events_rx) = mpsc::channel::<AsrEvent>(64);
    let worker = backend.map(|backend| {
        AsrStreamWorker::new(
            call_id.clone(),
            backend,
            WorkerConfig {
                language_code: settings.asr.language_code.clone(),
                phrase_hints: settings.asr.phrase_hints.clone(),
                queue_capacity: settings.asr.queue_capacity,
                pre_stream_buffer_secs: settings.asr.pre_stream_buffer_secs,
                warmup_silence_secs: settings.asr.warmup_silence_secs,
                keepalive_interval_secs: settings.asr.keepalive_interval_secs,
                close_join_secs: settings.asr.close_join_secs,
            },
            asr_events_tx,
        )
    });

    // recognition events → session mailbox
    let forward_tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = asr_events_rx.recv().await {
            let mapped = match event {
                AsrEvent::Transcript {
                    text,
                    is_final,
                    confidence,
                } => SessionEvent::Transcript {
                    text,
                    is_final,
                    confidence,
                },
                AsrEvent::Error { message, permanent } => {
                    SessionEvent::AsrFailed { message, permanent }
                }
            };
            if forward_tx.send(mapped).await.is_err() {
                return;
            }
        }
    });

    let pipeline_config = PipelineConfig {
        barge_in_threshold: settings.audio.barge_in_threshold,
        silence_threshold: settings.audio.silence_threshold,
        noise_suppression: settings.audio.noise_suppression,
        backchannel_silence_secs: settings.timers.backchannel_silence_secs,
    };

    tokio::spawn(async move {
        let mut pipeline = match AudioPipeline::new(pipeline_config) {
            Ok(p) => p,
            Err(e) => {
                error!(call_id, error = %e, "audio pipeline init failed");
                return;
            }
        };
        if let Some(path) = debug_wav
            && let Err(e) = pipeline.arm_recording(&path)
        {
            warn!(call_id, error = %e, "debug wav recording unavailable");
        }

        let mut worker = worker;
        let mut decode_errors = 0u64;
        while let Some(payload) = audio_rx.recv().await {
            match pipeline.process_ulaw_frame(
                &payload,
                status.is_playing(),
                status.in_initial_greeting(),
            ) {
                Ok(out) => {
                    if out.is_voice {
                        *last_voice_at.lock() = Some(Instant::now());
                    }
                    if out.barge_in {
                        let _ = events_tx.try_send(SessionEvent::BargeIn);
                    }
                    if out.backchannel_due {
                        let _ = events_tx.try_send(SessionEvent::BackchannelDue);
                    }
                    if let Some(worker) = worker.as_mut() {
                        worker.feed_audio(&out.pcm_16k);
                    }
                }
                Err(e) => {
                    decode_errors += 1;
                    if decode_errors == 1 || decode_errors.is_multiple_of(500) {
                        warn!(call_id, errors = decode_errors, error = %e, "frame processing failed");
                    }
                }
            }
        }
        if let Some(mut worker) = worker {
            worker.end_stream().await;
        }
        debug!(call_id, "audio task stopped");
    });
}

struct PartialBuffer {
    text: String,
    updated_at: Instant,
}

struct SessionActor {
    call_id: String,
    profile: ClientProfile,
    settings: Arc<GatewaySettings>,
    esl: EslClient,
    registry: Arc<CallRegistry>,
    engine: DialogueEngine,
    state: ConversationState,
    partial: Option<PartialBuffer>,
    last_processed_final: Option<String>,
    last_backchannel_at: Option<Instant>,
    timers: TimerSet,
    logger: SessionLogger,
    playback: PlaybackHandle,
    status: Arc<PlaybackStatus>,
    events_tx: mpsc::Sender<SessionEvent>,
    no_input_elapsed: f64,
    recording_path: std::path::PathBuf,
    last_voice_at: Arc<parking_lot::Mutex<Option<Instant>>>,
    torn_down: bool,
}

impl SessionActor {
    fn new(
        args: SessionArgs,
        playback: PlaybackHandle,
        status: Arc<PlaybackStatus>,
        events_tx: mpsc::Sender<SessionEvent>,
        last_voice_at: Arc<parking_lot::Mutex<Option<Instant>>>,
    ) -> Self {
        let mut state = ConversationState::new();
        state.phase = args.initial_phase;
        state
            .meta
            .insert("client_id".to_string(), args.profile.client_id.clone());
        if let Some(caller) = &args.caller_number {
            state.meta.insert("caller_number".to_string(), caller.clone());
        }
        let logger = SessionLogger::create(
            &args.settings.paths.sessions_root,
            &args.profile.client_id,
            &args.call_id,
        );
        let engine = DialogueEngine::new(args.profile.engine_config.clone());
        Self {
            call_id: args.call_id,
            engine,
            state,
            partial: None,
            last_processed_final: None,
            last_backchannel_at: None,
            timers: TimerSet::new(),
            logger,
            playback,
            status,
            events_tx,
            no_input_elapsed: 0.0,
            recording_path: args.recording_path,
            last_voice_at,
            esl: args.esl,
            registry: args.registry,
            settings: args.settings,
            profile: args.profile,
            torn_down: false,
        }
    }

    async fn run(mut self, mut events_rx: mpsc::Receiver<SessionEvent>) {
        info!(call_id = %self.call_id, client_id = %self.profile.client_id, "session actor started");
        while let Some(event) = events_rx.recv().await {
            let stop = self.handle_event(event).await;
            if stop {
                break;
            }
        }
        self.teardown().await;
        info!(call_id = %self.call_id, "session actor stopped");
    }

    /// Returns true when the actor should stop.
    async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Transcript {
                text,
                is_final,
                confidence,
            } => {
                self.on_transcript(&text, is_final, confidence).await;
                false
            }
            SessionEvent::AsrFailed { message, permanent } => {
                self.on_asr_failed(&message, permanent).await;
                false
            }
            SessionEvent::BargeIn => {
                debug!(call_id = %self.call_id, "barge-in, breaking playback");
                self.playback.interrupt().await;
                false
            }
            SessionEvent::BackchannelDue => {
                self.maybe_backchannel().await;
                false
            }
            SessionEvent::SilenceTick => {
                self.on_silence_tick().await;
                false
            }
            SessionEvent::PlaybackFinished {
                transfer_after,
                auto_hangup,
                greeting,
            } => {
                self.on_playback_finished(transfer_after, auto_hangup, greeting)
                    .await;
                false
            }
            SessionEvent::TransferRequested => {
                self.state.transfer_requested = true;
                if !self.status.is_playing() {
                    self.execute_transfer().await;
                }
                false
            }
            SessionEvent::HangupTimer => {
                self.do_hangup("auto_hangup_timer").await;
                true
            }
            SessionEvent::Hangup { source } => {
                self.do_hangup(source).await;
                true
            }
        }
    }

    async fn on_transcript(&mut self, text: &str, is_final: bool, confidence: Option<f64>) {
        self.logger.log_transcript(text, is_final, confidence);
        self.gc_stale_partial();

        if !is_final {
            self.on_partial(text).await;
            return;
        }

        let partial_text = self.partial.take().map(|p| p.text).unwrap_or_default();
        let merged = if text.is_empty() { partial_text } else { text.to_string() };

        if merged.is_empty() {
            // empty final behaves like a silence timeout
            self.run_no_input_turn().await;
            return;
        }

        // any committed utterance ends the silence ladder, even one that is
        // later deduplicated or filtered
        if self.state.no_input_streak > 0 {
            info!(call_id = %self.call_id, "no-input streak reset by caller speech");
            self.state.no_input_streak = 0;
        }
        self.no_input_elapsed = 0.0;

        let normalized = normalize_text(&merged);
        if self
            .last_processed_final
            .as_deref()
            .is_some_and(|prev| prev == normalized)
        {
            debug!(call_id = %self.call_id, "duplicate final suppressed");
            return;
        }

        if is_hallucination(&merged) {
            debug!(call_id = %self.call_id, text = %merged, "hallucinated transcript dropped");
            return;
        }

        let char_count = merged.chars().count();
        if char_count < MIN_TEXT_CHARS_FOR_INTENT {
            if char_count == 1 && AMBIGUOUS_VOWELS.contains(&merged.as_str()) {
                let reply = self.engine.ambiguous_vowel_reply(&self.call_id, &mut self.state);
                self.process_reply(reply).await;
            } else {
                debug!(call_id = %self.call_id, text = %merged, "final too short, skipped");
            }
            return;
        }

        self.last_processed_final = Some(normalized);
        self.logger.log_turn("USER", &merged, None);

        let phase_before = self.state.phase;
        let reply = self.engine.generate_reply(
            &self.call_id,
            &mut self.state,
            &merged,
            self.profile.operator_available(),
        );
        info!(
            call_id = %self.call_id,
            phase_before = %phase_before,
            phase_after = %self.state.phase,
            intent = reply.label,
            templates = ?reply.template_ids,
            transfer = reply.transfer_requested,
            "dialogue turn"
        );
        self.process_reply(reply).await;
    }

    async fn on_partial(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(partial) = &self.partial
            && !text.starts_with(partial.text.as_str())
            && !text.contains(partial.text.as_str())
        {
            warn!(
                call_id = %self.call_id,
                prev = %partial.text,
                new = %text,
                "non-cumulative partial update"
            );
        }
        self.partial = Some(PartialBuffer {
            text: text.to_string(),
            updated_at: Instant::now(),
        });

        let stripped = text.trim();
        let chars = stripped.chars().count();
        if (1..=6).contains(&chars)
            && BACKCHANNEL_TRIGGERS.iter().any(|k| stripped.contains(k))
        {
            self.maybe_backchannel().await;
        }
    }

    fn gc_stale_partial(&mut self) {
        let max_age = Duration::from_secs_f64(self.settings.dialogue.partial_max_age_secs);
        if let Some(partial) = &self.partial
            && partial.updated_at.elapsed() > max_age
        {
            warn!(call_id = %self.call_id, text = %partial.text, "stale partial dropped");
            self.partial = None;
        }
    }

    async fn maybe_backchannel(&mut self) {
        if self.status.is_playing() || self.state.phase == Phase::End {
            return;
        }
        if self
            .last_backchannel_at
            .is_some_and(|at| at.elapsed().as_secs_f64() < self.settings.timers.backchannel_silence_secs)
        {
            return;
        }
        let items = self.build_play_items(&[BACKCHANNEL_TEMPLATE.to_string()]);
        if items.is_empty() {
            return;
        }
        debug!(call_id = %self.call_id, "backchannel fired");
        self.last_backchannel_at = Some(Instant::now());
        self.playback.play(items, false, false).await;
    }

    async fn on_silence_tick(&mut self) {
        if self.status.is_playing() || self.state.phase == Phase::End {
            return;
        }
        let since_voice = self
            .last_voice_at
            .lock()
            .as_ref()
            .map(|at| at.elapsed().as_secs_f64());
        if let Some(secs) = since_voice
            && secs < self.settings.timers.silence_arm_secs
        {
            return;
        }

        self.no_input_elapsed += self.settings.timers.no_input_timeout_secs;
        self.run_no_input_turn().await;

        if self.no_input_elapsed >= self.settings.timers.max_no_input_secs {
            warn!(
                call_id = %self.call_id,
                elapsed = self.no_input_elapsed,
                "max no-input time exceeded, forcing hangup"
            );
            self.timers.schedule_auto_hangup(
                &self.call_id,
                self.events_tx.clone(),
                Duration::from_secs(1),
            );
        }
    }

    async fn run_no_input_turn(&mut self) {
        if self.state.phase == Phase::End {
            return;
        }
        let reply = self.engine.no_input_reply(&self.call_id, &mut self.state);
        info!(
            call_id = %self.call_id,
            streak = self.state.no_input_streak,
            templates = ?reply.template_ids,
            "no-input turn"
        );
        self.process_reply(reply).await;
    }

    async fn process_reply(&mut self, reply: Reply) {
        self.logger.record_intent(reply.label);
        for id in &reply.template_ids {
            if let Some(template) = self.profile.templates.lookup(id)
                && !template.text.is_empty()
            {
                self.logger.log_turn("AI", &template.text, Some(id));
            }
        }

        if self.state.phase == Phase::Intro {
            debug!(call_id = %self.call_id, "intro playing, reply suppressed");
            return;
        }

        let items = self.build_play_items(&reply.template_ids);
        if !items.is_empty() {
            self.playback
                .play(items, reply.transfer_requested, false)
                .await;
        } else if reply.transfer_requested {
            // nothing to play, so the gate is already open
            self.execute_transfer().await;
        }

        if reply.auto_hangup == Some(AutoHangup::Close) {
            if self.settings.force_immediate_hangup {
                info!(call_id = %self.call_id, "forced immediate hangup (debug)");
                self.do_hangup("force_immediate").await;
            } else {
                self.timers.schedule_auto_hangup(
                    &self.call_id,
                    self.events_tx.clone(),
                    Duration::from_secs_f64(self.settings.timers.close_hangup_delay_secs),
                );
            }
        }
    }

    fn build_play_items(&self, template_ids: &[String]) -> Vec<PlayItem> {
        let mut items = Vec::with_capacity(template_ids.len());
        for id in template_ids {
            match resolve_audio_path(&self.profile.audio_dir, id) {
                Some(path) => {
                    let template = self.profile.templates.lookup(id);
                    items.push(PlayItem {
                        template_id: id.clone(),
                        path,
                        wait_after: template.and_then(|t| t.wait_time_after),
                        auto_hangup: template.map(|t| t.auto_hangup).unwrap_or(false),
                    });
                }
                None => {
                    warn!(
                        call_id = %self.call_id,
                        template_id = %id,
                        audio_dir = %self.profile.audio_dir.display(),
                        "missing template audio"
                    );
                    let fallback = &self.settings.dialogue.fallback_template;
                    if fallback != id
                        && let Some(path) = resolve_audio_path(&self.profile.audio_dir, fallback)
                    {
                        info!(call_id = %self.call_id, template_id = %id, fallback = %fallback, "substituting fallback audio");
                        items.push(PlayItem {
                            template_id: fallback.clone(),
                            path,
                            wait_after: None,
                            auto_hangup: false,
                        });
                    }
                }
            }
        }
        items
    }

    async fn on_playback_finished(
        &mut self,
        transfer_after: bool,
        auto_hangup: bool,
        greeting: bool,
    ) {
        if greeting {
            if self.state.phase == Phase::Intro {
                self.state.phase = Phase::Entry;
                debug!(call_id = %self.call_id, "intro complete, phase -> ENTRY");
            }
            self.timers.arm_no_input(
                &self.call_id,
                self.events_tx.clone(),
                Duration::from_secs_f64(self.settings.timers.no_input_timeout_secs),
            );
        }

        if auto_hangup {
            self.timers.schedule_auto_hangup(
                &self.call_id,
                self.events_tx.clone(),
                Duration::from_secs_f64(self.settings.timers.give_up_hangup_delay_secs),
            );
        }

        if transfer_after || (self.state.transfer_requested && !self.state.transfer_executed) {
            self.execute_transfer().await;
        }
    }

    async fn execute_transfer(&mut self) {
        if self.state.transfer_executed || !self.state.transfer_requested {
            return;
        }
        let Some(number) = self.profile.transfer_number.clone() else {
            warn!(call_id = %self.call_id, "transfer requested but no operator number configured");
            return;
        };

        info!(call_id = %self.call_id, operator = %number, "transferring to operator");
        let _ = self.esl.uuid_break(&self.call_id).await;
        if let Some(caller_id) = &self.profile.caller_id_number {
            let _ = self
                .esl
                .uuid_setvar(&self.call_id, "effective_caller_id_number", caller_id)
                .await;
        }
        if let Some(name) = &self.profile.caller_id_name {
            let _ = self
                .esl
                .uuid_setvar(&self.call_id, "effective_caller_id_name", name)
                .await;
        }

        match self.esl.uuid_transfer(&self.call_id, &number).await {
            Ok(reply) if reply.ok() => {
                self.state.transfer_executed = true;
                self.logger
                    .log_turn("SYSTEM", &format!("transfer to operator {number}"), None);
                info!(call_id = %self.call_id, "transfer command issued");
            }
            other => {
                warn!(call_id = %self.call_id, result = ?other, "transfer failed, falling back");
                let items = self.build_play_items(&["083".to_string()]);
                if !items.is_empty() {
                    self.playback.play(items, false, false).await;
                }
                self.timers.schedule_auto_hangup(
                    &self.call_id,
                    self.events_tx.clone(),
                    Duration::from_secs_f64(self.settings.timers.close_hangup_delay_secs),
                );
            }
        }
    }

    async fn on_asr_failed(&mut self, message: &str, permanent: bool) {
        if permanent {
            error!(
                call_id = %self.call_id,
                error = %message,
                "permanent recognizer failure; continuing without fallback speech"
            );
            return;
        }
        if self.state.handoff_state == HandoffState::Done && self.state.transfer_requested {
            debug!(call_id = %self.call_id, "asr failed after handoff already done");
            return;
        }
        warn!(call_id = %self.call_id, error = %message, "recognizer lost, apologizing and transferring");
        self.state.handoff_state = HandoffState::Done;
        self.state.handoff_completed = true;
        self.state.handoff_prompt_sent = true;
        self.state.transfer_requested = true;
        // streaks restart whenever handoff reaches done
        self.state.unclear_streak = 0;
        self.state.not_heard_streak = 0;
        self.logger.record_intent("HANDOFF_ERROR_FALLBACK");

        if self.profile.operator_available() {
            let items = self.build_play_items(&["081".to_string(), "082".to_string()]);
            if items.is_empty() {
                self.execute_transfer().await;
            } else {
                self.playback.play(items, true, false).await;
            }
        } else {
            // nothing to hand off to; wind the call down politely
            self.state.transfer_requested = false;
            let items = self.build_play_items(&["086".to_string(), "087".to_string()]);
            if !items.is_empty() {
                self.playback.play(items, false, false).await;
            }
            self.timers.schedule_auto_hangup(
                &self.call_id,
                self.events_tx.clone(),
                Duration::from_secs_f64(self.settings.timers.close_hangup_delay_secs),
            );
        }
    }

    async fn do_hangup(&mut self, source: &str) {
        info!(call_id = %self.call_id, source, "hanging up");
        if self.profile.save_calls {
            let path = self.recording_path.display().to_string();
            let _ = self.esl.uuid_record(&self.call_id, false, &path).await;
        }
        if let Err(e) = self.esl.uuid_kill(&self.call_id).await {
            warn!(call_id = %self.call_id, error = %e, "uuid_kill failed");
        }
        self.teardown().await;
    }

    /// Idempotent: a second invocation is a no-op.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.timers.cancel_all();
        self.playback.shutdown().await;
        self.registry.remove(&self.call_id);
        self.partial = None;

        let handoff_occurred = self.state.transfer_requested
            || self.state.handoff_completed
            || self.state.phase == Phase::HandoffDone;
        self.logger
            .write_summary(handoff_occurred, self.state.phase.as_str());
        info!(call_id = %self.call_id, final_phase = %self.state.phase, "session torn down");
    }
}

/// Repeated-phrase and filler-word detection for recognizer hallucinations.
fn is_hallucination(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() > 15 {
        let unique: std::collections::HashSet<&char> = chars.iter().collect();
        if unique.len() < 8 {
            return true;
        }
    }
    HALLUCINATION_WORDS
        .iter()
        .any(|word| text.matches(word).count() > 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hallucination_filter() {
        assert!(is_hallucination(""));
        assert!(is_hallucination("おかげで、おかげで、おかげで助かりました"));
        assert!(is_hallucination("あああああああああああああああああ"));
        assert!(!is_hallucination("もしもし"));
        assert!(!is_hallucination("料金について教えてください"));
        // one or two occurrences of a filler word are fine
        assert!(!is_hallucination("おかげで助かりました"));
    }

    #[test]
    fn backchannel_trigger_set_is_short_words() {
        for word in BACKCHANNEL_TRIGGERS {
            assert!(word.chars().count() <= 6);
        }
        assert!(BACKCHANNEL_TRIGGERS.contains(&"はい"));
    }

    #[test]
    fn ambiguous_vowels_are_single_chars() {
        for v in AMBIGUOUS_VOWELS {
            assert_eq!(v.chars().count(), 1);
        }
    }
}

//! Per-call playback coordinator.
//!
//! Serializes template playback over the softswitch: one `uuid_broadcast` at
//! a time, completion detected by CHANNEL_EXECUTE_COMPLETE or a duration
//! estimate capped by the watchdog. A new request breaks whatever is playing
//! unless the protected greeting sequence is running; the same template is
//! not replayed within the duplicate window.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libertycall_esl::EslClient;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::SessionEvent;

/// Playback state shared with the audio pipeline (barge-in gating).
#[derive(Debug, Default)]
pub struct PlaybackStatus {
    pub playing: AtomicBool,
    pub initial_greeting: AtomicBool,
}

impl PlaybackStatus {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn in_initial_greeting(&self) -> bool {
        self.initial_greeting.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct PlayItem {
    pub template_id: String,
    pub path: PathBuf,
    pub wait_after: Option<f32>,
    pub auto_hangup: bool,
}

#[derive(Debug)]
pub enum PlaybackCmd {
    Play {
        items: Vec<PlayItem>,
        transfer_after: bool,
        greeting: bool,
    },
    Break,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub watchdog_secs: f64,
    pub duplicate_window_secs: f64,
}

#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::Sender<PlaybackCmd>,
}

impl PlaybackHandle {
    pub async fn play(&self, items: Vec<PlayItem>, transfer_after: bool, greeting: bool) {
        let _ = self
            .tx
            .send(PlaybackCmd::Play {
                items,
                transfer_after,
                greeting,
            })
            .await;
    }

    pub async fn interrupt(&self) {
        let _ = self.tx.send(PlaybackCmd::Break).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(PlaybackCmd::Shutdown).await;
    }
}

/// True when the template played recently enough to be suppressed.
fn recently_played(
    last_play: &HashMap<String, Instant>,
    template_id: &str,
    window: Duration,
) -> bool {
    last_play
        .get(template_id)
        .is_some_and(|at| at.elapsed() < window)
}

pub fn spawn_playback_coordinator(
    call_id: String,
    esl: EslClient,
    status: Arc<PlaybackStatus>,
    events_tx: mpsc::Sender<SessionEvent>,
    config: PlaybackConfig,
) -> PlaybackHandle {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(coordinator_loop(call_id, esl, status, events_tx, config, rx));
    PlaybackHandle { tx }
}

async fn coordinator_loop(
    call_id: String,
    esl: EslClient,
    status: Arc<PlaybackStatus>,
    events_tx: mpsc::Sender<SessionEvent>,
    config: PlaybackConfig,
    mut cmd_rx: mpsc::Receiver<PlaybackCmd>,
) {
    let mut esl_events = esl.subscribe();
    let mut last_play: HashMap<String, Instant> = HashMap::new();
    let dup_window = Duration::from_secs_f64(config.duplicate_window_secs);
    let watchdog = Duration::from_secs_f64(config.watchdog_secs);

    let mut queue: VecDeque<PlayItem> = VecDeque::new();
    let mut transfer_after = false;
    let mut greeting = false;
    let mut played_any = false;
    let mut sequence_auto_hangup = false;

    'outer: loop {
        if queue.is_empty() {
            status.playing.store(false, Ordering::Relaxed);
            if played_any {
                if greeting {
                    status.initial_greeting.store(false, Ordering::Relaxed);
                    info!(call_id, "initial greeting sequence complete");
                }
                let _ = events_tx
                    .send(SessionEvent::PlaybackFinished {
                        transfer_after,
                        auto_hangup: sequence_auto_hangup,
                        greeting,
                    })
                    .await;
                played_any = false;
                transfer_after = false;
                greeting = false;
                sequence_auto_hangup = false;
            }

            match cmd_rx.recv().await {
                Some(PlaybackCmd::Play {
                    items,
                    transfer_after: ta,
                    greeting: g,
                }) => {
                    queue = items.into();
                    transfer_after = ta;
                    greeting = g;
                    sequence_auto_hangup = false;
                    if g {
                        status.initial_greeting.store(true, Ordering::Relaxed);
                    }
                }
                Some(PlaybackCmd::Break) => {
                    // nothing playing; stray break is harmless
                    continue;
                }
                Some(PlaybackCmd::Shutdown) | None => break,
            }
            continue;
        }

        let Some(item) = queue.pop_front() else {
            continue;
        };
        if recently_played(&last_play, &item.template_id, dup_window) {
            info!(
                call_id,
                template_id = %item.template_id,
                "skipping recently played template"
            );
            continue;
        }

        let path = item.path.display().to_string();
        let reply = esl.uuid_broadcast(&call_id, &path).await;
        match &reply {
            Ok(r) if r.ok() => {
                debug!(call_id, template_id = %item.template_id, path = %path, "broadcast started")
            }
            Ok(r) => warn!(call_id, template_id = %item.template_id, body = %r.body, "broadcast rejected"),
            Err(e) => {
                warn!(call_id, template_id = %item.template_id, error = %e, "broadcast failed");
                continue;
            }
        }
        last_play.insert(item.template_id.clone(), Instant::now());
        status.playing.store(true, Ordering::Relaxed);
        played_any = true;
        if item.auto_hangup {
            sequence_auto_hangup = true;
        }

        let expected = Duration::from_secs_f64(
            libertycall_media::estimate_playback_secs(&item.path),
        );
        let deadline = expected.min(watchdog);
        let started = Instant::now();

        // wait for playback completion, a break, or an overriding request
        let mut interrupted = false;
        loop {
            tokio::select! {
                event = esl_events.recv() => match event {
                    Ok(event) => {
                        if event.name() == Some("CHANNEL_EXECUTE_COMPLETE")
                            && event.get("Application") == Some("playback")
                            && event.get("Unique-ID") == Some(call_id.as_str())
                        {
                            debug!(call_id, template_id = %item.template_id, "playback complete event");
                            break;
                        }
                    }
                    // lost events: fall back to the duration estimate
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(deadline.saturating_sub(started.elapsed())) => {
                    if started.elapsed() >= watchdog {
                        warn!(call_id, template_id = %item.template_id, "playback watchdog fired");
                    }
                    break;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(PlaybackCmd::Break) => {
                        let _ = esl.uuid_break(&call_id).await;
                        queue.clear();
                        status.playing.store(false, Ordering::Relaxed);
                        interrupted = true;
                        info!(call_id, "playback interrupted");
                        break;
                    }
                    Some(PlaybackCmd::Play { items, transfer_after: ta, greeting: g }) => {
                        if status.in_initial_greeting() {
                            // greeting is protected; the new turn queues behind
                            // it and the current item keeps playing
                            queue.extend(items);
                            transfer_after = transfer_after || ta;
                        } else {
                            let _ = esl.uuid_break(&call_id).await;
                            queue = items.into();
                            transfer_after = ta;
                            greeting = g;
                            interrupted = true;
                            info!(call_id, "active playback replaced by new request");
                            break;
                        }
                    }
                    Some(PlaybackCmd::Shutdown) | None => break 'outer,
                },
            }
        }

        if !interrupted
            && let Some(wait) = item.wait_after
            && queue.is_empty()
        {
            // give the caller room to answer before the next sequence lands
            tokio::time::sleep(Duration::from_secs_f64(wait as f64)).await;
        }
    }

    status.playing.store(false, Ordering::Relaxed);
    debug!(call_id, "playback coordinator stopped");
}

//! Per-call streaming recognition worker.
//!
//! Owns one live session against the backend: lazy start on first audio, a
//! warmup silence burst, a bounded audio queue that never blocks the RTP
//! path, keepalive frames while the caller is quiet, a close sentinel with a
//! bounded join, and restart-on-next-feed crash recovery. Results and errors
//! are forwarded to the session through an event channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{is_permanent_error, StreamEvent, StreamingAsrBackend, StreamingConfig};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub language_code: String,
    pub phrase_hints: Vec<String>,
    /// Bounded queue depth in 20 ms chunks (500 ≈ 10 s).
    pub queue_capacity: usize,
    pub pre_stream_buffer_secs: f64,
    pub warmup_silence_secs: f64,
    pub keepalive_interval_secs: f64,
    pub close_join_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
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

/// Event delivered to the session actor.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    Transcript {
        text: String,
        is_final: bool,
        confidence: Option<f64>,
    },
    Error {
        message: String,
        permanent: bool,
    },
}

/// Queue message: audio chunk or the close sentinel.
type QueueMsg = Option<Vec<i16>>;

pub struct AsrStreamWorker {
    call_id: String,
    backend: Arc<dyn StreamingAsrBackend>,
    config: WorkerConfig,
    events_tx: mpsc::Sender<AsrEvent>,
    queue_tx: Option<mpsc::Sender<QueueMsg>>,
    task: Option<JoinHandle<()>>,
    pre_buffer: Vec<i16>,
    pre_buffer_max_samples: usize,
    permanent_failure: Arc<AtomicBool>,
    dropped_chunks: u64,
}

impl AsrStreamWorker {
    pub fn new(
        call_id: String,
        backend: Arc<dyn StreamingAsrBackend>,
        config: WorkerConfig,
        events_tx: mpsc::Sender<AsrEvent>,
    ) -> Self {
        let pre_buffer_max_samples = (16000.0 * config.pre_stream_buffer_secs) as usize;
        Self {
            call_id,
            backend,
            config,
            events_tx,
            queue_tx: None,
            task: None,
            pre_buffer: Vec::new(),
            pre_buffer_max_samples,
            permanent_failure: Arc::new(AtomicBool::new(false)),
            dropped_chunks: 0,
        }
    }

    fn running(&self) -> bool {
        matches!(&self.task, Some(task) if !task.is_finished()) && self.queue_tx.is_some()
    }

    /// Queues one 16 kHz PCM16 chunk. Starts (or restarts) the stream when
    /// needed; never blocks — a full queue drops the chunk with a warning.
    pub fn feed_audio(&mut self, chunk: &[i16]) {
        if chunk.is_empty() || self.permanent_failure.load(Ordering::Relaxed) {
            return;
        }

        if !self.running() {
            self.pre_buffer.extend_from_slice(chunk);
            if self.pre_buffer.len() >= self.pre_buffer_max_samples {
                warn!(call_id = %self.call_id, "pre-stream buffer full, forcing stream start");
            }
            self.start_stream_worker();
            return;
        }

        self.enqueue(chunk.to_vec());
    }

    fn enqueue(&mut self, chunk: Vec<i16>) {
        let Some(tx) = self.queue_tx.clone() else {
            return;
        };
        if tx.try_send(Some(chunk)).is_err() {
            self.dropped_chunks += 1;
            if self.dropped_chunks == 1 || self.dropped_chunks.is_multiple_of(100) {
                warn!(
                    call_id = %self.call_id,
                    dropped = self.dropped_chunks,
                    "asr audio queue full, dropping chunk"
                );
            }
        }
    }

    fn start_stream_worker(&mut self) {
        let (queue_tx, queue_rx) = mpsc::channel::<QueueMsg>(self.config.queue_capacity);
        self.queue_tx = Some(queue_tx);

        let call_id = self.call_id.clone();
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let events_tx = self.events_tx.clone();
        let permanent_failure = Arc::clone(&self.permanent_failure);
        info!(call_id, backend = backend.name(), "asr stream worker starting");
        self.task = Some(tokio::spawn(run_stream(
            call_id,
            backend,
            config,
            queue_rx,
            events_tx,
            permanent_failure,
        )));

        if !self.pre_buffer.is_empty() {
            let buffered = std::mem::take(&mut self.pre_buffer);
            debug!(call_id = %self.call_id, samples = buffered.len(), "flushing pre-stream buffer");
            self.enqueue(buffered);
        }
    }

    /// Closes the stream: sentinel in, worker joined within the close budget.
    pub async fn end_stream(&mut self) {
        if let Some(tx) = self.queue_tx.take() {
            let _ = tx.try_send(None);
        }
        if let Some(task) = self.task.take() {
            let join = tokio::time::timeout(
                Duration::from_secs_f64(self.config.close_join_secs),
                task,
            )
            .await;
            if join.is_err() {
                warn!(call_id = %self.call_id, "asr worker did not join in time, aborting");
            }
        }
        self.pre_buffer.clear();
        self.pre_buffer.shrink_to_fit();
    }
}

async fn run_stream(
    call_id: String,
    backend: Arc<dyn StreamingAsrBackend>,
    config: WorkerConfig,
    mut queue_rx: mpsc::Receiver<QueueMsg>,
    events_tx: mpsc::Sender<AsrEvent>,
    permanent_failure: Arc<AtomicBool>,
) {
    let stream_config = StreamingConfig {
        language_code: config.language_code.clone(),
        sample_rate: 16000,
        phrase_hints: config.phrase_hints.clone(),
    };

    let (audio_tx, mut event_rx) = match backend.start_stream(stream_config).await {
        Ok(pair) => pair,
        Err(e) => {
            let message = e.to_string();
            let permanent = is_permanent_error(&message);
            if permanent {
                permanent_failure.store(true, Ordering::Relaxed);
            }
            warn!(call_id, permanent, error = %message, "asr stream failed to start");
            let _ = events_tx
                .send(AsrEvent::Error { message, permanent })
                .await;
            return;
        }
    };

    // Prime the recognizer so the caller's first syllable is not clipped.
    let warmup_samples = (16000.0 * config.warmup_silence_secs) as usize;
    if warmup_samples > 0 {
        let _ = audio_tx.send(vec![0i16; warmup_samples]).await;
        debug!(call_id, warmup_samples, "warmup silence sent");
    }

    let keepalive_after =
        (config.keepalive_interval_secs / 0.1).max(1.0) as u32;
    let mut empty_waits = 0u32;
    let mut closed_error: Option<Option<String>> = None;

    loop {
        tokio::select! {
            msg = queue_rx.recv() => match msg {
                Some(Some(chunk)) => {
                    empty_waits = 0;
                    if audio_tx.send(chunk).await.is_err() {
                        debug!(call_id, "audio side closed while sending");
                        break;
                    }
                }
                Some(None) | None => {
                    debug!(call_id, "close sentinel received");
                    break;
                }
            },
            event = event_rx.recv() => match event {
                Some(StreamEvent::Result(result)) => {
                    let _ = events_tx.send(AsrEvent::Transcript {
                        text: result.text,
                        is_final: result.is_final,
                        confidence: result.confidence,
                    }).await;
                }
                Some(StreamEvent::Closed { error }) => {
                    closed_error = Some(error);
                    break;
                }
                None => {
                    closed_error = Some(None);
                    break;
                }
            },
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                empty_waits += 1;
                if empty_waits >= keepalive_after {
                    empty_waits = 0;
                    // empty frame keeps the server from timing the stream out
                    if audio_tx.send(Vec::new()).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    drop(audio_tx);

    // Flush whatever the recognizer still has before reporting closure.
    if closed_error.is_none() {
        let drain = tokio::time::timeout(
            Duration::from_secs_f64(config.close_join_secs),
            async {
                while let Some(event) = event_rx.recv().await {
                    match event {
                        StreamEvent::Result(result) => {
                            let _ = events_tx
                                .send(AsrEvent::Transcript {
                                    text: result.text,
                                    is_final: result.is_final,
                                    confidence: result.confidence,
                                })
                                .await;
                        }
                        StreamEvent::Closed { error } => return Some(error),
                    }
                }
                None
            },
        )
        .await;
        closed_error = match drain {
            Ok(Some(error)) => Some(error),
            Ok(None) | Err(_) => Some(None),
        };
    }

    if let Some(Some(message)) = closed_error {
        let permanent = is_permanent_error(&message);
        if permanent {
            permanent_failure.store(true, Ordering::Relaxed);
        }
        warn!(call_id, permanent, error = %message, "asr stream crashed (restart on next feed)");
        let _ = events_tx
            .send(AsrEvent::Error { message, permanent })
            .await;
    } else {
        info!(call_id, "asr stream worker stopped");
    }
}

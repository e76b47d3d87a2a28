pub mod auth;
pub mod google;
pub mod worker;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Configuration for one streaming recognition session.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// BCP-47 code, e.g. "ja-JP".
    pub language_code: String,
    /// Sample rate of the audio pushed into the stream (always 16000 here).
    pub sample_rate: u32,
    /// Domain phrase hints forwarded to the recognizer.
    pub phrase_hints: Vec<String>,
}

/// One interim or committed recognition result.
#[derive(Debug, Clone)]
pub struct StreamingResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: Option<f64>,
}

/// Event on the result side of a streaming session.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Result(StreamingResult),
    /// The server side ended. `error` is `None` on a clean close.
    Closed { error: Option<String> },
}

/// Trait for streaming speech recognizers.
///
/// `start_stream` opens one bidirectional session: audio chunks (PCM16 mono
/// at `sample_rate`) go in through the sender — an empty chunk is a
/// keepalive — and events come back through the receiver. Dropping the
/// sender closes the audio side; the backend then flushes remaining results
/// and emits [`StreamEvent::Closed`].
#[async_trait]
pub trait StreamingAsrBackend: Send + Sync + 'static {
    async fn start_stream(
        &self,
        config: StreamingConfig,
    ) -> anyhow::Result<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<StreamEvent>)>;

    /// Human-readable backend name.
    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream error: {0}")]
    Stream(String),
}

/// Errors that no amount of reconnecting will fix: bad credentials, unknown
/// project, malformed config. The engine must not play the apology fallback
/// for these.
pub fn is_permanent_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "credentials",
        "authentication",
        "permission",
        "unauthorized",
        "forbidden",
        "not found",
        "invalid",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

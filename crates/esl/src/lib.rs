//! FreeSWITCH event-socket (inbound) client.
//!
//! One connection task owns the TCP socket: it authenticates, subscribes to
//! the channel events the gateway consumes, serializes api commands, and
//! fans incoming events out on a broadcast channel. Handles are cheap clones
//! over an mpsc mailbox, so every call shares the single softswitch
//! connection. Replies are matched to commands FIFO, which is how the event
//! socket itself behaves.

mod frame;

pub use frame::{EslEvent, EslFrame};

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EslConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Connect attempts per reconnect round.
    pub max_reconnect_attempts: u32,
    /// Pause before a fresh reconnect round after a crash.
    pub listener_restart_secs: f64,
    /// Per-command reply budget.
    pub command_timeout_secs: f64,
}

impl Default for EslConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8021,
            password: "ClueCon".to_string(),
            max_reconnect_attempts: 3,
            listener_restart_secs: 3.0,
            command_timeout_secs: 5.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EslError {
    #[error("not connected to the event socket")]
    NotConnected,
    #[error("authentication rejected")]
    AuthRejected,
    #[error("command timed out")]
    Timeout,
    #[error("connection closed while waiting for a reply")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reply to an api command.
#[derive(Debug, Clone)]
pub struct EslReply {
    pub reply_text: Option<String>,
    pub body: String,
}

impl EslReply {
    /// The event socket signals success with a `+OK` in the reply text or
    /// body.
    pub fn ok(&self) -> bool {
        self.body.contains("+OK")
            || self
                .reply_text
                .as_deref()
                .is_some_and(|t| t.contains("+OK"))
    }
}

struct Command {
    line: String,
    respond: oneshot::Sender<Result<EslReply, EslError>>,
}

/// Cloneable handle to the shared connection task.
#[derive(Clone)]
pub struct EslClient {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EslEvent>,
    command_timeout: Duration,
}

impl EslClient {
    /// Spawns the connection task and returns a handle. The task reconnects
    /// forever; it only exits when every handle is dropped.
    pub fn connect(config: EslConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel::<Command>(64);
        let (events_tx, _) = broadcast::channel(256);
        let command_timeout = Duration::from_secs_f64(config.command_timeout_secs);
        tokio::spawn(connection_task(config, commands_rx, events_tx.clone()));
        Self {
            commands: commands_tx,
            events: events_tx,
            command_timeout,
        }
    }

    /// Subscribes to softswitch events (CHANNEL_EXECUTE_COMPLETE etc.).
    pub fn subscribe(&self) -> broadcast::Receiver<EslEvent> {
        self.events.subscribe()
    }

    /// Sends one api command and waits for its reply.
    pub async fn api(&self, command: impl Into<String>) -> Result<EslReply, EslError> {
        let (respond, rx) = oneshot::channel();
        let cmd = Command {
            line: command.into(),
            respond,
        };
        self.commands
            .send(cmd)
            .await
            .map_err(|_| EslError::NotConnected)?;
        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(EslError::ConnectionClosed),
            Err(_) => Err(EslError::Timeout),
        }
    }

    pub async fn uuid_broadcast(&self, uuid: &str, path: &str) -> Result<EslReply, EslError> {
        self.api(format!("uuid_broadcast {uuid} {path} aleg")).await
    }

    pub async fn uuid_break(&self, uuid: &str) -> Result<EslReply, EslError> {
        self.api(format!("uuid_break {uuid} all")).await
    }

    pub async fn uuid_setvar(
        &self,
        uuid: &str,
        var: &str,
        value: &str,
    ) -> Result<EslReply, EslError> {
        self.api(format!("uuid_setvar {uuid} {var} {value}")).await
    }

    pub async fn uuid_transfer(&self, uuid: &str, number: &str) -> Result<EslReply, EslError> {
        self.api(format!("uuid_transfer {uuid} {number}")).await
    }

    pub async fn uuid_kill(&self, uuid: &str) -> Result<EslReply, EslError> {
        self.api(format!("uuid_kill {uuid}")).await
    }

    pub async fn uuid_record(
        &self,
        uuid: &str,
        start: bool,
        path: &str,
    ) -> Result<EslReply, EslError> {
        let action = if start { "start" } else { "stop" };
        self.api(format!("uuid_record {uuid} {action} {path}")).await
    }

    pub async fn uuid_getvar(&self, uuid: &str, var: &str) -> Result<EslReply, EslError> {
        self.api(format!("uuid_getvar {uuid} {var}")).await
    }
}

async fn connection_task(
    config: EslConfig,
    mut commands_rx: mpsc::Receiver<Command>,
    events_tx: broadcast::Sender<EslEvent>,
) {
    loop {
        let stream = match connect_with_backoff(&config).await {
            Some(stream) => stream,
            None => {
                // all handles gone; nothing left to serve
                if commands_rx.is_closed() {
                    return;
                }
                tokio::time::sleep(Duration::from_secs_f64(config.listener_restart_secs)).await;
                continue;
            }
        };

        info!(host = %config.host, port = config.port, "event socket connected");
        if let Err(e) = serve_connection(stream, &config, &mut commands_rx, &events_tx).await {
            warn!(error = %e, "event socket connection lost, reconnecting");
        }
        if commands_rx.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_secs_f64(config.listener_restart_secs)).await;
    }
}

async fn connect_with_backoff(config: &EslConfig) -> Option<TcpStream> {
    for attempt in 1..=config.max_reconnect_attempts {
        match TcpStream::connect((config.host.as_str(), config.port)).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                warn!(
                    attempt,
                    max = config.max_reconnect_attempts,
                    error = %e,
                    "event socket connect failed"
                );
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }
        }
    }
    None
}

/// Aborts a spawned task when dropped. `tokio::spawn` handles detach on
/// drop, so the reader task must be cancelled explicitly when the
/// connection loop exits.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn serve_connection(
    stream: TcpStream,
    config: &EslConfig,
    commands_rx: &mut mpsc::Receiver<Command>,
    events_tx: &broadcast::Sender<EslEvent>,
) -> Result<(), EslError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // auth handshake: server greets with auth/request
    let greeting = frame::read_frame(&mut reader).await?;
    if greeting.content_type.as_deref() != Some("auth/request") {
        warn!(content_type = ?greeting.content_type, "unexpected greeting");
    }
    write_half
        .write_all(format!("auth {}\n\n", config.password).as_bytes())
        .await?;
    let auth_reply = frame::read_frame(&mut reader).await?;
    if !auth_reply.reply_ok() {
        error!("event socket auth rejected");
        return Err(EslError::AuthRejected);
    }

    // only the events the gateway consumes
    write_half
        .write_all(b"event plain CHANNEL_EXECUTE_COMPLETE CHANNEL_HANGUP\n\n")
        .await?;
    let sub_reply = frame::read_frame(&mut reader).await?;
    if !sub_reply.reply_ok() {
        warn!("event subscription not acknowledged");
    }

    // Frame reading runs in its own task: read_frame is not cancellation
    // safe, so it must never sit in a select arm that can be dropped
    // mid-frame.
    let (frame_tx, mut frame_rx) = mpsc::channel::<EslFrame>(64);
    let reader_task = tokio::spawn(async move {
        loop {
            match frame::read_frame(&mut reader).await {
                Ok(frame) => {
                    if frame_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    });
    let _reader_guard = AbortOnDrop(reader_task);

    let mut pending: VecDeque<oneshot::Sender<Result<EslReply, EslError>>> = VecDeque::new();

    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    for respond in pending.drain(..) {
                        let _ = respond.send(Err(EslError::ConnectionClosed));
                    }
                    return Err(EslError::ConnectionClosed);
                };
                match frame.content_type.as_deref() {
                    Some("api/response") | Some("command/reply") => {
                        if let Some(respond) = pending.pop_front() {
                            let _ = respond.send(Ok(EslReply {
                                reply_text: frame.headers.get("Reply-Text").cloned(),
                                body: frame.body.clone(),
                            }));
                        } else {
                            debug!(body = %frame.body, "unsolicited reply frame");
                        }
                    }
                    Some("text/event-plain") => {
                        let event = EslEvent::parse(&frame.body);
                        let _ = events_tx.send(event);
                    }
                    Some("text/disconnect-notice") => {
                        for respond in pending.drain(..) {
                            let _ = respond.send(Err(EslError::ConnectionClosed));
                        }
                        return Err(EslError::ConnectionClosed);
                    }
                    other => {
                        debug!(content_type = ?other, "ignoring frame");
                    }
                }
            }
            cmd = commands_rx.recv() => {
                let Some(cmd) = cmd else {
                    return Ok(());
                };
                debug!(command = %cmd.line, "sending api command");
                if let Err(e) = write_half
                    .write_all(format!("api {}\n\n", cmd.line).as_bytes())
                    .await
                {
                    let _ = cmd.respond.send(Err(EslError::ConnectionClosed));
                    return Err(e.into());
                }
                pending.push_back(cmd.respond);
            }
        }
    }
}

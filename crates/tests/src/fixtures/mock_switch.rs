//! Scripted softswitch: speaks just enough of the event-socket protocol for
//! the gateway to authenticate, run api commands, and see playback events.
//! Every received command is recorded for assertions.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub struct MockSwitch {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
}

impl MockSwitch {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock switch");
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&commands);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve(socket, recorded).await;
                });
            }
        });
        Self { addr, commands }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// Polls until a command containing `needle` shows up.
    pub async fn wait_for(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count_matching(needle) > 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls until `needle` has been seen `count` times.
    pub async fn wait_for_count(&self, needle: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count_matching(needle) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn serve(mut socket: TcpStream, recorded: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    socket.write_all(b"Content-Type: auth/request\n\n").await?;

    let mut buf = vec![0u8; 8192];
    let mut acc = String::new();
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        acc.push_str(&String::from_utf8_lossy(&buf[..n]));
        while let Some(idx) = acc.find("\n\n") {
            let message = acc[..idx].to_string();
            acc = acc[idx + 2..].to_string();
            recorded.lock().unwrap().push(message.clone());

            if message.starts_with("auth ") || message.starts_with("event ") {
                socket
                    .write_all(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n")
                    .await?;
            } else if message.starts_with("api ") {
                let body = "+OK\n";
                let reply = format!(
                    "Content-Type: api/response\nContent-Length: {}\n\n{}",
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await?;

                // a broadcast "finishes" immediately, except for audio whose
                // path carries the "slow" marker (kept playing so barge-in
                // and watchdog behavior can be observed)
                if let Some(rest) = message.strip_prefix("api uuid_broadcast ")
                    && !message.contains("slow")
                    && let Some(uuid) = rest.split_whitespace().next()
                {
                    let event_body = format!(
                        "Event-Name: CHANNEL_EXECUTE_COMPLETE\nApplication: playback\nUnique-ID: {uuid}\n"
                    );
                    let event = format!(
                        "Content-Type: text/event-plain\nContent-Length: {}\n\n{}",
                        event_body.len(),
                        event_body
                    );
                    socket.write_all(event.as_bytes()).await?;
                }
            }
        }
    }
}

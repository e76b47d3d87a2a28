//! Event-socket wire framing: header block, blank line, optional
//! Content-Length body.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncReadExt};

/// One frame off the socket.
#[derive(Debug, Clone)]
pub struct EslFrame {
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl EslFrame {
    /// `+OK` acknowledgment in the reply text.
    pub fn reply_ok(&self) -> bool {
        self.headers
            .get("Reply-Text")
            .is_some_and(|t| t.contains("+OK"))
    }
}

/// A parsed plain-text event (the body of a text/event-plain frame).
#[derive(Debug, Clone)]
pub struct EslEvent {
    headers: HashMap<String, String>,
}

impl EslEvent {
    pub fn parse(body: &str) -> Self {
        let mut headers = HashMap::new();
        for line in body.lines() {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_string(), url_decode(value.trim()));
            }
        }
        Self { headers }
    }

    pub fn name(&self) -> Option<&str> {
        self.get("Event-Name")
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.headers.get(header).map(String::as_str)
    }
}

/// Event header values arrive percent-encoded ("Local%20User" etc.).
fn url_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (
                (bytes[i + 1] as char).to_digit(16),
                (bytes[i + 2] as char).to_digit(16),
            )
        {
            out.push((hi * 16 + lo) as u8);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Reads one frame: headers until a blank line, then Content-Length bytes of
/// body if announced.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<EslFrame>
where
    R: AsyncBufReadExt + AsyncReadExt + Unpin,
{
    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "event socket closed",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    let body = match headers
        .get("Content-Length")
        .and_then(|l| l.parse::<usize>().ok())
    {
        Some(len) if len > 0 => {
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await?;
            String::from_utf8_lossy(&buf).into_owned()
        }
        _ => String::new(),
    };

    Ok(EslFrame {
        content_type: headers.get("Content-Type").cloned(),
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_headers_and_body() {
        let raw = b"Content-Type: api/response\nContent-Length: 4\n\n+OK\n";
        let mut reader = BufReader::new(Cursor::new(raw.to_vec()));
        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.content_type.as_deref(), Some("api/response"));
        assert_eq!(frame.body, "+OK\n");
    }

    #[tokio::test]
    async fn reads_bodyless_reply() {
        let raw = b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n";
        let mut reader = BufReader::new(Cursor::new(raw.to_vec()));
        let frame = read_frame(&mut reader).await.unwrap();
        assert!(frame.reply_ok());
        assert!(frame.body.is_empty());
    }

    #[test]
    fn event_parsing_decodes_headers() {
        let body = "Event-Name: CHANNEL_EXECUTE_COMPLETE\nApplication: playback\nCaller-Caller-ID-Name: Local%20User\n";
        let event = EslEvent::parse(body);
        assert_eq!(event.name(), Some("CHANNEL_EXECUTE_COMPLETE"));
        assert_eq!(event.get("Application"), Some("playback"));
        assert_eq!(event.get("Caller-Caller-ID-Name"), Some("Local User"));
        assert_eq!(event.get("Missing"), None);
    }
}

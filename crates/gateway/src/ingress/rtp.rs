//! RTP/UDP audio ingress.
//!
//! The softswitch writes `rtp_info_*.txt` files describing each call's RTP
//! legs; the receiver maps a datagram's source port to its call through
//! those files and hands the stripped payload to the session's audio task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use libertycall_media::RtpPacket;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Minimum spacing between directory rescans triggered by unknown ports.
const RESCAN_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_rtp_receiver(state: AppState) -> anyhow::Result<()> {
    let port = state.settings.network.rtp_port;
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    info!(port, "rtp receiver listening");

    let mut scanner = RtpInfoScanner::new(state.settings.paths.rtp_info_dir.clone());
    let mut buf = vec![0u8; 2048];
    let mut unknown_drops: u64 = 0;
    let mut last_seq: HashMap<String, u16> = HashMap::new();

    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let data = &buf[..len];

        let call_id = match state.registry.call_for_rtp_port(peer.port()) {
            Some(call_id) => call_id,
            None => {
                for (port, uuid) in scanner.scan_if_due() {
                    state.registry.map_rtp_port(port, &uuid);
                }
                match state.registry.call_for_rtp_port(peer.port()) {
                    Some(call_id) => call_id,
                    None => {
                        unknown_drops += 1;
                        if unknown_drops == 1 || unknown_drops.is_multiple_of(1000) {
                            warn!(
                                peer = %peer,
                                drops = unknown_drops,
                                "rtp from unmapped port"
                            );
                        }
                        continue;
                    }
                }
            }
        };

        let Some(packet) = RtpPacket::parse(data) else {
            debug!(peer = %peer, "invalid rtp packet");
            continue;
        };
        let payload = packet.payload(data);
        if payload.is_empty() {
            continue;
        }

        // sequence tracking: gaps are logged, lost frames are not concealed
        let seq = packet.header.sequence_number;
        if let Some(prev) = last_seq.get(&call_id) {
            let expected = prev.wrapping_add(1);
            if seq != expected {
                let gap = seq.wrapping_sub(*prev).wrapping_sub(1);
                debug!(call_id = %call_id, gap, "rtp packet loss detected");
            }
        }

        match state.registry.get(&call_id) {
            Some(session) => {
                last_seq.insert(call_id.clone(), seq);
                session.push_audio(payload.to_vec());
            }
            None => {
                // stale mapping after teardown; forget its sequence state
                last_seq.remove(&call_id);
            }
        }
    }
}

/// Parses the softswitch's `rtp_info_*.txt` drop files:
/// `uuid=...`, `local=IP:PORT`, `remote=IP:PORT` per line.
struct RtpInfoScanner {
    dir: PathBuf,
    last_scan: Option<Instant>,
}

impl RtpInfoScanner {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            last_scan: None,
        }
    }

    fn scan_if_due(&mut self) -> Vec<(u16, String)> {
        if self
            .last_scan
            .is_some_and(|at| at.elapsed() < RESCAN_INTERVAL)
        {
            return Vec::new();
        }
        self.last_scan = Some(Instant::now());
        scan_rtp_info_dir(&self.dir)
    }
}

fn scan_rtp_info_dir(dir: &Path) -> Vec<(u16, String)> {
    let mut mappings = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return mappings;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("rtp_info_") || !name.ends_with(".txt") {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Some((uuid, port)) = parse_rtp_info(&contents) {
            mappings.push((port, uuid));
        }
    }
    mappings
}

/// Extracts `(uuid, remote_port)` from one info file.
fn parse_rtp_info(contents: &str) -> Option<(String, u16)> {
    let mut uuid = None;
    let mut remote_port = None;
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "uuid" => uuid = Some(value.trim().to_string()),
            "remote" => {
                remote_port = value.trim().rsplit_once(':').and_then(|(_, p)| p.parse().ok());
            }
            _ => {}
        }
    }
    Some((uuid?, remote_port?))
}

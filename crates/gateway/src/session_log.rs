//! Per-call session artifacts: `transcript.jsonl`, `call_log.txt`, and the
//! final `summary.json`, plus the retention janitor.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::GatewayError;

pub struct SessionLogger {
    dir: PathBuf,
    call_id: String,
    client_id: String,
    started_at: chrono::DateTime<Local>,
    total_phrases: u64,
    intents: Vec<String>,
    summary_written: bool,
}

impl SessionLogger {
    /// Computes the session directory once; files are created lazily on the
    /// first write so silent calls still get a summary but no empty logs.
    pub fn create(sessions_root: &Path, client_id: &str, call_id: &str) -> Self {
        let now = Local::now();
        let call8: String = call_id.chars().take(8).collect();
        let dir = sessions_root
            .join(now.format("%Y-%m-%d").to_string())
            .join(client_id)
            .join(format!("session_{}_{}", now.format("%Y%m%d_%H%M%S"), call8));
        Self {
            dir,
            call_id: call_id.to_string(),
            client_id: client_id.to_string(),
            started_at: now,
            total_phrases: 0,
            intents: Vec::new(),
            summary_written: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(&self, file: &str, line: &str) -> Result<(), GatewayError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        Ok(())
    }

    /// One JSON object per ASR event.
    pub fn log_transcript(&mut self, text: &str, is_final: bool, confidence: Option<f64>) {
        if is_final && !text.is_empty() {
            self.total_phrases += 1;
        }
        let event = json!({
            "timestamp": Local::now().to_rfc3339(),
            "call_id": self.call_id,
            "text": text,
            "is_final": is_final,
            "confidence": confidence,
        });
        if let Err(e) = self.append("transcript.jsonl", &event.to_string()) {
            warn!(call_id = %self.call_id, error = %e, "transcript write failed");
        }
    }

    /// One plaintext line per dialogue turn.
    pub fn log_turn(&mut self, role: &str, text: &str, template_id: Option<&str>) {
        let ts = Local::now().format("%H:%M:%S");
        let line = match template_id {
            Some(id) => format!("[{ts}] {role}: {text} (template: {id})"),
            None => format!("[{ts}] {role}: {text}"),
        };
        if let Err(e) = self.append("call_log.txt", &line) {
            warn!(call_id = %self.call_id, error = %e, "call log write failed");
        }
    }

    pub fn record_intent(&mut self, intent: &str) {
        if !self.intents.iter().any(|i| i == intent) {
            self.intents.push(intent.to_string());
        }
    }

    /// Written exactly once at teardown; later calls are no-ops so a double
    /// teardown cannot clobber the summary.
    pub fn write_summary(&mut self, handoff_occurred: bool, final_phase: &str) {
        if self.summary_written {
            debug!(call_id = %self.call_id, "summary already written");
            return;
        }
        let summary = json!({
            "client_id": self.client_id,
            "uuid": self.call_id,
            "start_time": self.started_at.to_rfc3339(),
            "end_time": Local::now().to_rfc3339(),
            "total_phrases": self.total_phrases,
            "intents": self.intents,
            "handoff_occurred": handoff_occurred,
            "final_phase": final_phase,
        });
        let result = std::fs::create_dir_all(&self.dir).and_then(|_| {
            std::fs::write(
                self.dir.join("summary.json"),
                serde_json::to_string_pretty(&summary).unwrap_or_default(),
            )
        });
        match result {
            Ok(()) => {
                self.summary_written = true;
                info!(call_id = %self.call_id, dir = %self.dir.display(), "session summary written");
            }
            Err(e) => warn!(call_id = %self.call_id, error = %e, "summary write failed"),
        }
    }
}

/// Deletes per-day session directories older than the retention window.
pub fn cleanup_stale_sessions(sessions_root: &Path, max_age_days: u32) {
    let Ok(entries) = std::fs::read_dir(sessions_root) else {
        return;
    };
    let cutoff =
        std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days as u64 * 86400);
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let too_old = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|m| m < cutoff)
            .unwrap_or(false);
        if too_old {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => info!(dir = %path.display(), "stale session directory removed"),
                Err(e) => warn!(dir = %path.display(), error = %e, "stale session cleanup failed"),
            }
        }
    }
}

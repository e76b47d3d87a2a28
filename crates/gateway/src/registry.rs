//! Process-wide call bookkeeping.
//!
//! All cross-call maps live here and are only mutated on lifecycle events:
//! init registers, teardown removes. Sessions themselves share nothing;
//! lookups hand out `Arc<SessionHandle>` clones keyed by call id.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::session::SessionHandle;

#[derive(Default)]
pub struct CallRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
    /// Duplicate-init latch.
    started: DashSet<String>,
    /// Intro sequence double-start guard (client "001").
    intro_played: DashSet<String>,
    /// RTP sender port → call id.
    rtp_ports: DashMap<u16, String>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a call as started. Returns false when init already ran for it.
    pub fn mark_started(&self, call_id: &str) -> bool {
        self.started.insert(call_id.to_string())
    }

    pub fn mark_intro_played(&self, call_id: &str) -> bool {
        self.intro_played.insert(call_id.to_string())
    }

    pub fn insert(&self, session: Arc<SessionHandle>) {
        self.sessions.insert(session.call_id.clone(), session);
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(call_id).map(|s| Arc::clone(s.value()))
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn map_rtp_port(&self, port: u16, call_id: &str) {
        self.rtp_ports.insert(port, call_id.to_string());
    }

    pub fn call_for_rtp_port(&self, port: u16) -> Option<String> {
        self.rtp_ports.get(&port).map(|c| c.clone())
    }

    /// Removes every trace of a call. Safe to run twice.
    pub fn remove(&self, call_id: &str) {
        self.sessions.remove(call_id);
        self.started.remove(call_id);
        self.intro_played.remove(call_id);
        self.rtp_ports.retain(|_, mapped| mapped != call_id);
        debug!(call_id, remaining = self.sessions.len(), "call deregistered");
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Conversation phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Intro,
    Entry,
    EntryConfirm,
    Waiting,
    NotHeard,
    Qa,
    After085,
    Closing,
    Handoff,
    HandoffConfirmWait,
    HandoffDone,
    End,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Intro => "INTRO",
            Phase::Entry => "ENTRY",
            Phase::EntryConfirm => "ENTRY_CONFIRM",
            Phase::Waiting => "WAITING",
            Phase::NotHeard => "NOT_HEARD",
            Phase::Qa => "QA",
            Phase::After085 => "AFTER_085",
            Phase::Closing => "CLOSING",
            Phase::Handoff => "HANDOFF",
            Phase::HandoffConfirmWait => "HANDOFF_CONFIRM_WAIT",
            Phase::HandoffDone => "HANDOFF_DONE",
            Phase::End => "END",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the handoff confirmation sub-machine stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffState {
    Idle,
    Confirming,
    Done,
}

impl HandoffState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffState::Idle => "idle",
            HandoffState::Confirming => "confirming",
            HandoffState::Done => "done",
        }
    }
}

/// Mutable per-call dialogue state. Owned by the session actor; never shared
/// between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub phase: Phase,
    pub last_intent: Option<crate::intent::Intent>,
    pub handoff_state: HandoffState,
    pub handoff_retry_count: u32,
    /// "0604" has been sent at least once in this call.
    pub handoff_prompt_sent: bool,
    pub handoff_completed: bool,
    pub transfer_requested: bool,
    /// One-way latch: once a transfer command has been dispatched it stays set
    /// for the lifetime of the call.
    pub transfer_executed: bool,
    /// Consecutive turns that ended in the "110" template.
    pub unclear_streak: u32,
    pub not_heard_streak: u32,
    /// Consecutive silence-timer expirations (110 → 111 → 112 ladder).
    pub no_input_streak: u32,
    pub last_ai_templates: Vec<String>,
    /// Free-form breadcrumbs (client_id, reason_for_handoff, ...).
    pub meta: HashMap<String, String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            phase: Phase::Entry,
            last_intent: None,
            handoff_state: HandoffState::Idle,
            handoff_retry_count: 0,
            handoff_prompt_sent: false,
            handoff_completed: false,
            transfer_requested: false,
            transfer_executed: false,
            unclear_streak: 0,
            not_heard_streak: 0,
            no_input_streak: 0,
            last_ai_templates: Vec::new(),
            meta: HashMap::new(),
        }
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }
}

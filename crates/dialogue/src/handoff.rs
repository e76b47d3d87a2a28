//! Handoff confirmation sub-machine.
//!
//! Entered after the engine has asked "0604" (shall I connect you to a
//! person?). Interprets the caller's reply; an ambiguous answer gets one
//! re-ask, a second ambiguous answer fails safe to yes.

use tracing::debug;

use crate::intent::{ClassifyContext, Intent, classify_intent};
use crate::state::{ConversationState, HandoffState, Phase};

/// Outcome of one confirmation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Caller accepted (explicitly, or by exhausting the re-ask budget).
    Yes { fallback: bool },
    /// Caller declined; wind the call down.
    No,
    /// Ambiguous first reply; 0604 is re-asked.
    Reask,
}

impl ConfirmOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ConfirmOutcome::Yes { fallback: false } => "HANDOFF_YES",
            ConfirmOutcome::Yes { fallback: true } => "HANDOFF_FALLBACK_YES",
            ConfirmOutcome::No => "HANDOFF_NO",
            ConfirmOutcome::Reask => "HANDOFF_FALLBACK_REASK",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HandoffStateMachine;

impl HandoffStateMachine {
    /// Handles one caller reply while `handoff_state == confirming`.
    /// Returns the templates to play, the outcome, and whether a transfer is
    /// now requested.
    pub fn handle_confirm(
        &self,
        call_id: &str,
        raw_text: &str,
        intent: Intent,
        state: &mut ConversationState,
    ) -> (Vec<String>, ConfirmOutcome, bool) {
        let mut reply_intent = classify_intent(raw_text, ClassifyContext::HandoffConfirming);
        if reply_intent == Intent::Unknown {
            reply_intent = intent;
        }

        match reply_intent {
            Intent::HandoffYes => {
                self.complete(state, true, Phase::HandoffDone);
                (
                    vec!["081".to_string(), "082".to_string()],
                    ConfirmOutcome::Yes { fallback: false },
                    true,
                )
            }
            Intent::HandoffNo => {
                self.complete(state, false, Phase::End);
                (
                    vec!["086".to_string(), "087".to_string()],
                    ConfirmOutcome::No,
                    false,
                )
            }
            _ if state.handoff_retry_count == 0 => {
                state.handoff_state = HandoffState::Confirming;
                state.handoff_retry_count = 1;
                state.transfer_requested = false;
                debug!(call_id, intent = %reply_intent, "ambiguous handoff reply, re-asking 0604");
                (vec!["0604".to_string()], ConfirmOutcome::Reask, false)
            }
            _ => {
                // Second ambiguous reply: fail safe toward a human.
                debug!(call_id, intent = %reply_intent, "ambiguous handoff reply, failing safe to yes");
                self.complete(state, true, Phase::HandoffDone);
                (
                    vec!["081".to_string(), "082".to_string()],
                    ConfirmOutcome::Yes { fallback: true },
                    true,
                )
            }
        }
    }

    fn complete(&self, state: &mut ConversationState, transfer: bool, phase: Phase) {
        state.handoff_state = HandoffState::Done;
        state.handoff_retry_count = 0;
        state.handoff_completed = true;
        state.transfer_requested = transfer;
        state.unclear_streak = 0;
        state.not_heard_streak = 0;
        state.phase = phase;
    }
}

//! Misunderstanding guard: unclear / not-heard streak accounting and the
//! automatic handoff they escalate into.

use tracing::{debug, warn};

use crate::intent::Intent;
use crate::selector::NORMAL_ANSWER_TEMPLATES;
use crate::state::{ConversationState, HandoffState};

#[derive(Debug, Default, Clone, Copy)]
pub struct MisunderstandingGuard;

impl MisunderstandingGuard {
    /// Two consecutive unclear turns force a handoff proposal, unless a
    /// handoff confirmation is already pending or the caller just asked for
    /// one themselves. Returns the (possibly rewritten) intent and whether
    /// the rewrite fired.
    pub fn check_auto_handoff_from_unclear(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        intent: Intent,
    ) -> (Intent, bool) {
        if state.unclear_streak >= 2
            && matches!(state.handoff_state, HandoffState::Idle | HandoffState::Done)
            && !intent.is_handoff()
        {
            state
                .meta
                .insert("reason_for_handoff".to_string(), "auto_unclear".to_string());
            state.meta.insert(
                "unclear_streak_at_trigger".to_string(),
                state.unclear_streak.to_string(),
            );
            warn!(
                call_id,
                unclear_streak = state.unclear_streak,
                "unclear streak forcing HANDOFF_REQUEST"
            );
            return (Intent::HandoffRequest, true);
        }
        (intent, false)
    }

    /// "Please repeat" (110) twice in a row switches to the 0604 handoff
    /// question instead of asking a third time. Returns the possibly replaced
    /// template list and whether the caller should short-circuit.
    pub fn handle_not_heard_streak(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        template_ids: Vec<String>,
    ) -> (Vec<String>, bool) {
        if template_ids == ["110"] && state.phase != crate::state::Phase::End {
            state.not_heard_streak += 1;
            if state.not_heard_streak >= 2 {
                state.not_heard_streak = 0;
                state.handoff_state = HandoffState::Confirming;
                state.handoff_prompt_sent = true;
                state.transfer_requested = false;
                debug!(call_id, "not-heard streak escalated to 0604");
                return (vec!["0604".to_string()], true);
            }
        } else {
            state.not_heard_streak = 0;
        }
        (template_ids, false)
    }

    /// Tracks the unclear streak: 110 increments, any normal answer resets.
    pub fn handle_unclear_streak(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        template_ids: &[String],
    ) {
        if template_ids == ["110"] {
            state.unclear_streak += 1;
            warn!(
                call_id,
                unclear_streak = state.unclear_streak,
                "unclear streak incremented"
            );
        } else if template_ids
            .iter()
            .any(|tid| NORMAL_ANSWER_TEMPLATES.contains(&tid.as_str()))
        {
            if state.unclear_streak > 0 {
                warn!(
                    call_id,
                    reset_by = template_ids.first().map(String::as_str).unwrap_or("unknown"),
                    "unclear streak reset"
                );
            }
            state.unclear_streak = 0;
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;

    fn state() -> ConversationState {
        ConversationState::new()
    }

    #[test]
    fn auto_handoff_after_two_unclear_turns() {
        let guard = MisunderstandingGuard;
        let mut s = state();
        s.unclear_streak = 2;
        let (intent, fired) = guard.check_auto_handoff_from_unclear("c1", &mut s, Intent::Unknown);
        assert!(fired);
        assert_eq!(intent, Intent::HandoffRequest);
        assert_eq!(s.meta.get("reason_for_handoff").unwrap(), "auto_unclear");
        assert_eq!(s.meta.get("unclear_streak_at_trigger").unwrap(), "2");
    }

    #[test]
    fn auto_handoff_suppressed_while_confirming() {
        let guard = MisunderstandingGuard;
        let mut s = state();
        s.unclear_streak = 3;
        s.handoff_state = HandoffState::Confirming;
        let (intent, fired) = guard.check_auto_handoff_from_unclear("c1", &mut s, Intent::Unknown);
        assert!(!fired);
        assert_eq!(intent, Intent::Unknown);
    }

    #[test]
    fn auto_handoff_not_for_explicit_handoff_intents() {
        let guard = MisunderstandingGuard;
        let mut s = state();
        s.unclear_streak = 5;
        let (intent, fired) =
            guard.check_auto_handoff_from_unclear("c1", &mut s, Intent::HandoffYes);
        assert!(!fired);
        assert_eq!(intent, Intent::HandoffYes);
    }

    #[test]
    fn second_110_becomes_0604() {
        let guard = MisunderstandingGuard;
        let mut s = state();
        let (tpl, early) = guard.handle_not_heard_streak("c1", &mut s, vec!["110".to_string()]);
        assert!(!early);
        assert_eq!(tpl, vec!["110"]);
        assert_eq!(s.not_heard_streak, 1);

        let (tpl, early) = guard.handle_not_heard_streak("c1", &mut s, vec!["110".to_string()]);
        assert!(early);
        assert_eq!(tpl, vec!["0604"]);
        assert_eq!(s.not_heard_streak, 0);
        assert_eq!(s.handoff_state, HandoffState::Confirming);
        assert!(s.handoff_prompt_sent);
    }

    #[test]
    fn non_110_resets_not_heard_streak() {
        let guard = MisunderstandingGuard;
        let mut s = state();
        s.not_heard_streak = 1;
        let (_, early) = guard.handle_not_heard_streak("c1", &mut s, vec!["040".to_string()]);
        assert!(!early);
        assert_eq!(s.not_heard_streak, 0);
    }

    #[test]
    fn not_heard_ignored_in_end_phase() {
        let guard = MisunderstandingGuard;
        let mut s = state();
        s.phase = Phase::End;
        s.not_heard_streak = 1;
        let (_, early) = guard.handle_not_heard_streak("c1", &mut s, vec!["110".to_string()]);
        assert!(!early);
        // END phase neither increments nor escalates
        assert_eq!(s.not_heard_streak, 0);
    }

    #[test]
    fn unclear_streak_lifecycle() {
        let guard = MisunderstandingGuard;
        let mut s = state();
        guard.handle_unclear_streak("c1", &mut s, &["110".to_string()]);
        guard.handle_unclear_streak("c1", &mut s, &["110".to_string()]);
        assert_eq!(s.unclear_streak, 2);
        guard.handle_unclear_streak("c1", &mut s, &["040".to_string()]);
        assert_eq!(s.unclear_streak, 0);
    }
}

//! Per-call reply engine.
//!
//! Drives intent classification, the phase flow, the misunderstanding guard,
//! and the handoff sub-machine over one `ConversationState`. The engine is
//! synchronous and side-effect free: playback, transfer, and hangup are
//! returned as directives in [`Reply`] and executed by the session actor.

use tracing::{debug, info, warn};

use crate::guard::MisunderstandingGuard;
use crate::handoff::{ConfirmOutcome, HandoffStateMachine};
use crate::intent::{ClassifyContext, Intent, classify_intent, normalize_asr_variants, normalize_text};
use crate::selector::{ANSWER_TEMPLATES, QUESTION_INTENTS, select_template_ids};
use crate::state::{ConversationState, HandoffState, Phase};

/// Hangup directive attached to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoHangup {
    /// Wind-down timer after a closing pair (086/087) or a declined handoff.
    Close,
}

/// One engine turn: templates to play plus the side effects the session actor
/// must carry out.
#[derive(Debug, Clone)]
pub struct Reply {
    pub template_ids: Vec<String>,
    /// Base intent that drove selection (recorded in the session summary).
    pub intent: Intent,
    /// Reporting label; differs from `intent` for synthetic outcomes such as
    /// HANDOFF_FALLBACK_YES or HANDOFF_UNAVAILABLE.
    pub label: &'static str,
    pub transfer_requested: bool,
    pub auto_hangup: Option<AutoHangup>,
}

impl Reply {
    fn new(intent: Intent, template_ids: Vec<String>) -> Self {
        Self {
            template_ids,
            intent,
            label: intent.as_str(),
            transfer_requested: false,
            auto_hangup: None,
        }
    }
}

/// Keyword knobs that clients may override via their flow config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub entry_trigger_keywords: Vec<String>,
    pub closing_yes_keywords: Vec<String>,
    pub closing_no_keywords: Vec<String>,
    pub after_085_negative_keywords: Vec<String>,
    pub no_input_streak_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_trigger_keywords: to_owned(&["導入", "相談", "検討", "詳しく", "案内"]),
            closing_yes_keywords: to_owned(&["はい", "ええ", "お願いします", "お願い", "うん", "そうです"]),
            closing_no_keywords: to_owned(&[
                "結構です",
                "けっこうです",
                "大丈夫です",
                "いりません",
                "不要",
                "やめて",
                "また今度",
                "いらない",
            ]),
            after_085_negative_keywords: to_owned(&["ないです", "特にない", "大丈夫", "結構", "以上"]),
            no_input_streak_limit: 3,
        }
    }
}

fn to_owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

pub struct DialogueEngine {
    config: EngineConfig,
    guard: MisunderstandingGuard,
    handoff: HandoffStateMachine,
}

impl DialogueEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            guard: MisunderstandingGuard,
            handoff: HandoffStateMachine,
        }
    }

    /// Generates the reply for one final transcript.
    ///
    /// `operator_available` reflects whether the client has a transfer route
    /// configured; without one a handoff request is answered with 0605.
    pub fn generate_reply(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
        operator_available: bool,
    ) -> Reply {
        let phase_before = state.phase;
        let context = if state.handoff_state == HandoffState::Confirming {
            ClassifyContext::HandoffConfirming
        } else {
            ClassifyContext::None
        };
        let mut intent = classify_intent(raw_text, context);

        let (rewritten, _auto_fired) =
            self.guard
                .check_auto_handoff_from_unclear(call_id, state, intent);
        intent = rewritten;

        // A bare affirmation outside the confirmation question is not an
        // answer to anything; treat it as a fresh request for a person.
        // ENTRY_CONFIRM and CLOSING interpret yes/no themselves, so their
        // affirmations stay with the phase flow.
        if intent == Intent::HandoffYes
            && state.handoff_state != HandoffState::Confirming
            && !matches!(state.phase, Phase::EntryConfirm | Phase::Closing)
        {
            info!(call_id, "HANDOFF_YES outside confirming, downgrading to HANDOFF_REQUEST");
            intent = Intent::HandoffRequest;
        }

        if intent == Intent::HandoffRequest && !operator_available {
            warn!(call_id, "handoff requested but no operator route configured");
            state.handoff_state = HandoffState::Idle;
            state.handoff_retry_count = 0;
            state.handoff_prompt_sent = false;
            state.transfer_requested = false;
            state.phase = Phase::Qa;
            state
                .meta
                .insert("handoff_unavailable".to_string(), "true".to_string());
            state
                .meta
                .insert("handoff_alternative_offered".to_string(), "true".to_string());
            state.last_intent = Some(Intent::Inquiry);
            let mut reply = Reply::new(Intent::Inquiry, vec!["0605".to_string()]);
            reply.label = "HANDOFF_UNAVAILABLE";
            state.last_ai_templates = reply.template_ids.clone();
            return reply;
        }

        // An explicit request always (re)opens the confirmation question,
        // even after a completed handoff. transfer_executed stays latched.
        if intent == Intent::HandoffRequest {
            state.handoff_state = HandoffState::Confirming;
            state.handoff_retry_count = 0;
            state.handoff_prompt_sent = true;
            state.transfer_requested = false;
            state.last_intent = Some(intent);
            let reply = Reply::new(Intent::HandoffRequest, vec!["0604".to_string()]);
            state.last_ai_templates = reply.template_ids.clone();
            return reply;
        }

        // Handoff resolved with "no": keep answering, but 0604/104 are spent.
        if state.handoff_state == HandoffState::Done && !state.transfer_requested {
            let (flow_intent, mut template_ids, transfer) =
                self.run_conversation_flow(call_id, state, raw_text);
            template_ids.retain(|tid| tid != "0604" && tid != "104");
            state.last_ai_templates = template_ids.clone();
            let mut reply = Reply::new(flow_intent, template_ids);
            reply.transfer_requested = transfer;
            self.finish(call_id, state, phase_before, reply)
        } else if state.handoff_state == HandoffState::Confirming {
            self.handle_handoff_confirm(call_id, state, raw_text, intent)
        } else if intent == Intent::Unknown
            && state.handoff_state == HandoffState::Idle
            && !state.handoff_prompt_sent
        {
            // First UNKNOWN of the call offers the operator once.
            state.handoff_state = HandoffState::Confirming;
            state.handoff_retry_count = 0;
            state.handoff_prompt_sent = true;
            state.transfer_requested = false;
            let reply = Reply::new(Intent::Unknown, vec!["0604".to_string()]);
            state.last_ai_templates = reply.template_ids.clone();
            reply
        } else {
            let (base_intent, template_ids, transfer) =
                self.run_conversation_flow(call_id, state, raw_text);
            let mut template_ids = template_ids;

            if template_ids.iter().any(|t| t == "0604") {
                template_ids.retain(|tid| tid != "104");
            }

            if (intent == Intent::HandoffRequest || base_intent == Intent::HandoffRequest)
                && template_ids.is_empty()
            {
                warn!(call_id, phase = %state.phase, "empty selection for HANDOFF_REQUEST, forcing 0604");
                state.handoff_state = HandoffState::Confirming;
                state.handoff_retry_count = 0;
                state.handoff_prompt_sent = true;
                state.transfer_requested = false;
                template_ids = vec!["0604".to_string()];
            }

            // Streak accounting runs before escalation so that this turn's
            // "110" counts toward the trigger.
            self.guard.handle_unclear_streak(call_id, state, &template_ids);

            if state.unclear_streak >= 2
                && matches!(state.handoff_state, HandoffState::Idle | HandoffState::Done)
                && !base_intent.is_handoff()
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
                    "unclear streak escalating to 0604"
                );
                state.handoff_state = HandoffState::Confirming;
                state.handoff_retry_count = 0;
                state.handoff_prompt_sent = true;
                state.transfer_requested = false;
                state.not_heard_streak = 0;
                let reply = Reply::new(Intent::HandoffRequest, vec!["0604".to_string()]);
                state.last_ai_templates = reply.template_ids.clone();
                return reply;
            }

            let (template_ids, escalated) =
                self.guard
                    .handle_not_heard_streak(call_id, state, template_ids);
            if escalated {
                state.last_ai_templates = template_ids.clone();
                let mut reply = Reply::new(base_intent, template_ids);
                reply.transfer_requested = transfer;
                return reply;
            }

            let mut template_ids = template_ids;
            if QUESTION_INTENTS.contains(&base_intent)
                && !template_ids.iter().any(|t| t == "085")
                && phase_before != Phase::After085
                && state.phase == Phase::After085
                && !base_intent.is_handoff()
                && base_intent != Intent::EndCall
                && !template_ids.is_empty()
                && template_ids
                    .iter()
                    .any(|tid| ANSWER_TEMPLATES.contains(&tid.as_str()))
            {
                template_ids.push("085".to_string());
                debug!(call_id, intent = %base_intent, "appended 085 follow-up after answer");
            }

            state.last_ai_templates = template_ids.clone();
            let mut reply = Reply::new(base_intent, template_ids);
            reply.transfer_requested = transfer;
            self.finish(call_id, state, phase_before, reply)
        }
    }

    /// Silence-timer turn: walks the 110 → 111 → 112 ladder.
    pub fn no_input_reply(&self, call_id: &str, state: &mut ConversationState) -> Reply {
        state.no_input_streak = (state.no_input_streak + 1).min(self.config.no_input_streak_limit);
        let template = match state.no_input_streak {
            1 => "110",
            2 => "111",
            _ => "112",
        };
        info!(call_id, streak = state.no_input_streak, template, "no-input ladder");
        let reply = Reply::new(Intent::NotHeard, vec![template.to_string()]);
        state.last_ai_templates = reply.template_ids.clone();
        reply
    }

    /// Single ambiguous vowel ("あ", "ん", ...) on a final: treat as not
    /// heard without consulting the phase flow.
    pub fn ambiguous_vowel_reply(&self, call_id: &str, state: &mut ConversationState) -> Reply {
        debug!(call_id, "1-char ambiguous vowel treated as NOT_HEARD");
        let reply = Reply::new(Intent::NotHeard, vec!["110".to_string()]);
        state.last_ai_templates = reply.template_ids.clone();
        reply
    }

    /// Common exit: closing pair and END-transition hangup scheduling.
    fn finish(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        phase_before: Phase,
        mut reply: Reply,
    ) -> Reply {
        let has_close_pair = reply.template_ids.iter().any(|t| t == "086")
            && reply.template_ids.iter().any(|t| t == "087");
        let entered_end =
            phase_before != Phase::End && state.phase == Phase::End && !state.transfer_requested;
        if has_close_pair || entered_end {
            info!(call_id, close_pair = has_close_pair, "scheduling wind-down hangup");
            reply.auto_hangup = Some(AutoHangup::Close);
        }
        reply
    }

    fn handle_handoff_confirm(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
        intent: Intent,
    ) -> Reply {
        let (template_ids, outcome, transfer) =
            self.handoff.handle_confirm(call_id, raw_text, intent, state);
        let label = outcome.label();
        let base = match outcome {
            ConfirmOutcome::Yes { .. } => Intent::HandoffYes,
            ConfirmOutcome::No => Intent::HandoffNo,
            ConfirmOutcome::Reask => Intent::HandoffRequest,
        };
        state.last_intent = Some(base);
        state.last_ai_templates = template_ids.clone();
        let mut reply = Reply::new(base, template_ids);
        reply.label = label;
        reply.transfer_requested = transfer;
        if outcome == ConfirmOutcome::No {
            reply.auto_hangup = Some(AutoHangup::Close);
        }
        reply
    }

    fn contains_keywords(&self, normalized: &str, keywords: &[String]) -> bool {
        keywords.iter().any(|k| !k.is_empty() && normalized.contains(k.as_str()))
    }

    fn run_conversation_flow(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
    ) -> (Intent, Vec<String>, bool) {
        let normalized = normalize_asr_variants(&normalize_text(raw_text));

        let (intent, template_ids, transfer) = match state.phase {
            Phase::End => return (Intent::EndCall, Vec::new(), false),
            Phase::Intro => {
                debug!(call_id, "intro playing, suppressing reply");
                return (Intent::Unknown, Vec::new(), false);
            }
            Phase::Entry => self.handle_entry(call_id, state, raw_text, &normalized),
            Phase::EntryConfirm => self.handle_entry_confirm(call_id, state, raw_text, &normalized),
            Phase::Waiting => self.handle_waiting(call_id, state, raw_text),
            Phase::NotHeard => {
                state.phase = Phase::Qa;
                self.handle_qa(call_id, state, raw_text)
            }
            Phase::Qa => self.handle_qa(call_id, state, raw_text),
            Phase::After085 => self.handle_after_085(call_id, state, raw_text, &normalized),
            Phase::Closing => self.handle_closing(call_id, state, raw_text, &normalized),
            Phase::Handoff | Phase::HandoffConfirmWait => {
                self.handle_handoff_phase(call_id, state, raw_text)
            }
            Phase::HandoffDone => {
                state.phase = Phase::Qa;
                self.handle_qa(call_id, state, raw_text)
            }
        };

        let template_ids = if template_ids.is_empty() && state.phase != Phase::End {
            if intent.is_handoff() {
                // handled upstream; never paper over a handoff with 110
                Vec::new()
            } else {
                vec!["110".to_string()]
            }
        } else {
            template_ids
        };

        state.last_ai_templates = template_ids.clone();
        (intent, template_ids, transfer)
    }

    fn handle_entry(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
        normalized: &str,
    ) -> (Intent, Vec<String>, bool) {
        let intent = classify_intent(raw_text, ClassifyContext::None);
        if intent == Intent::NotHeard {
            state.phase = Phase::Qa;
            state.last_intent = Some(intent);
            return (intent, select_template_ids(intent, raw_text), false);
        }
        if intent == Intent::Greeting {
            state.phase = Phase::Qa;
            state.last_intent = Some(intent);
            return (
                intent,
                vec!["004".to_string(), "005".to_string()],
                false,
            );
        }
        if self.contains_keywords(normalized, &self.config.entry_trigger_keywords) {
            state.phase = Phase::EntryConfirm;
            state.last_intent = Some(Intent::Inquiry);
            return (Intent::Inquiry, vec!["006".to_string()], false);
        }
        state.phase = Phase::Qa;
        self.handle_qa(call_id, state, raw_text)
    }

    fn handle_entry_confirm(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
        normalized: &str,
    ) -> (Intent, Vec<String>, bool) {
        if self.contains_keywords(normalized, &self.config.closing_yes_keywords) {
            state.phase = Phase::Qa;
            state.last_intent = Some(Intent::Inquiry);
            return (Intent::Inquiry, vec!["010".to_string()], false);
        }
        if self.contains_keywords(normalized, &self.config.closing_no_keywords) {
            state.phase = Phase::End;
            state.last_intent = Some(Intent::EndCall);
            return (
                Intent::EndCall,
                vec!["087".to_string(), "088".to_string()],
                false,
            );
        }
        state.phase = Phase::Qa;
        self.handle_qa(call_id, state, raw_text)
    }

    fn handle_waiting(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
    ) -> (Intent, Vec<String>, bool) {
        if !raw_text.trim().is_empty() {
            state.phase = Phase::Qa;
            return self.handle_qa(call_id, state, raw_text);
        }
        state.phase = Phase::NotHeard;
        (Intent::NotHeard, vec!["110".to_string()], false)
    }

    fn handle_qa(
        &self,
        _call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
    ) -> (Intent, Vec<String>, bool) {
        let intent = classify_intent(raw_text, ClassifyContext::None);
        let transfer = state.transfer_requested;

        if state.handoff_state == HandoffState::Done {
            let mut template_ids = select_template_ids(intent, raw_text);
            template_ids.retain(|tid| tid != "0604" && tid != "104");
            self.advance_qa_phase(state, intent);
            state.last_intent = Some(intent);
            return (intent, template_ids, transfer);
        }

        if intent == Intent::InquiryPassive {
            let template_ids = select_template_ids(intent, raw_text);
            state.phase = Phase::Qa;
            state.last_intent = Some(intent);
            return (intent, template_ids, transfer);
        }

        let template_ids = select_template_ids(intent, raw_text);
        self.advance_qa_phase(state, intent);
        state.last_intent = Some(intent);
        (intent, template_ids, transfer)
    }

    fn advance_qa_phase(&self, state: &mut ConversationState, intent: Intent) {
        match intent {
            Intent::SalesCall => {
                if state.last_intent == Some(Intent::SalesCall) {
                    state.phase = Phase::End;
                } else {
                    state.phase = Phase::After085;
                }
            }
            Intent::EndCall => state.phase = Phase::End,
            _ => state.phase = Phase::After085,
        }
    }

    fn handle_after_085(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
        normalized: &str,
    ) -> (Intent, Vec<String>, bool) {
        let intent = classify_intent(raw_text, ClassifyContext::None);

        // A transfer request lands here regardless of handoff history.
        if intent == Intent::HandoffRequest
            && matches!(state.handoff_state, HandoffState::Idle | HandoffState::Done)
        {
            state.handoff_state = HandoffState::Confirming;
            state.handoff_retry_count = 0;
            state.handoff_prompt_sent = true;
            state.transfer_requested = false;
            state.last_intent = Some(intent);
            return (intent, vec!["0604".to_string()], false);
        }

        if intent == Intent::SalesCall && state.last_intent == Some(Intent::SalesCall) {
            state.phase = Phase::End;
            let mut template_ids = select_template_ids(intent, raw_text);
            if state.handoff_state == HandoffState::Done {
                template_ids.retain(|tid| tid != "0604" && tid != "104");
            }
            state.last_intent = Some(intent);
            return (intent, template_ids, false);
        }

        if self.contains_keywords(normalized, &self.config.after_085_negative_keywords) {
            state.phase = Phase::Closing;
            return (Intent::EndCall, vec!["013".to_string()], false);
        }

        state.phase = Phase::Qa;
        self.handle_qa(call_id, state, raw_text)
    }

    fn handle_closing(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
        normalized: &str,
    ) -> (Intent, Vec<String>, bool) {
        if self.contains_keywords(normalized, &self.config.closing_yes_keywords) {
            state.phase = Phase::Handoff;
            state.last_intent = Some(Intent::Setup);
            return (
                Intent::Setup,
                to_owned(&["060", "061", "062", "104"]),
                false,
            );
        }
        if self.contains_keywords(normalized, &self.config.closing_no_keywords) {
            state.phase = Phase::End;
            state.last_intent = Some(Intent::EndCall);
            return (
                Intent::EndCall,
                vec!["087".to_string(), "088".to_string()],
                false,
            );
        }
        state.phase = Phase::Qa;
        self.handle_qa(call_id, state, raw_text)
    }

    fn handle_handoff_phase(
        &self,
        call_id: &str,
        state: &mut ConversationState,
        raw_text: &str,
    ) -> (Intent, Vec<String>, bool) {
        let intent = classify_intent(raw_text, ClassifyContext::None);
        let (template_ids, outcome, transfer) =
            self.handoff.handle_confirm(call_id, raw_text, intent, state);
        match outcome {
            ConfirmOutcome::Yes { .. } => {
                state.last_intent = Some(Intent::HandoffYes);
                (Intent::HandoffYes, template_ids, transfer)
            }
            ConfirmOutcome::No => {
                state.last_intent = Some(Intent::EndCall);
                (Intent::HandoffNo, template_ids, transfer)
            }
            ConfirmOutcome::Reask => {
                state.phase = Phase::HandoffConfirmWait;
                state.last_intent = Some(Intent::HandoffRequest);
                (Intent::HandoffRequest, template_ids, transfer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DialogueEngine {
        DialogueEngine::new(EngineConfig::default())
    }

    fn qa_state() -> ConversationState {
        let mut s = ConversationState::new();
        s.phase = Phase::Qa;
        s
    }

    #[test]
    fn greeting_from_entry() {
        let e = engine();
        let mut s = ConversationState::new();
        let reply = e.generate_reply("c1", &mut s, "もしもし", true);
        assert_eq!(reply.template_ids, vec!["004", "005"]);
        assert_eq!(s.phase, Phase::Qa);
    }

    #[test]
    fn passive_inquiry_stays_in_qa() {
        let e = engine();
        let mut s = qa_state();
        let reply = e.generate_reply("c1", &mut s, "ちょっと検討中なんですけど", true);
        assert_eq!(reply.template_ids.len(), 1);
        assert!(reply.template_ids[0] == "089" || reply.template_ids[0] == "090");
        assert_eq!(s.phase, Phase::Qa);
        assert_eq!(reply.intent, Intent::InquiryPassive);
    }

    #[test]
    fn explicit_handoff_yes_flow() {
        let e = engine();
        let mut s = qa_state();

        let reply = e.generate_reply("c1", &mut s, "担当者お願いします", true);
        assert_eq!(reply.template_ids, vec!["0604"]);
        assert_eq!(s.handoff_state, HandoffState::Confirming);
        assert!(!reply.transfer_requested);

        let reply = e.generate_reply("c1", &mut s, "はい", true);
        assert_eq!(reply.template_ids, vec!["081", "082"]);
        assert!(reply.transfer_requested);
        assert_eq!(s.phase, Phase::HandoffDone);
        assert_eq!(s.handoff_state, HandoffState::Done);
        assert!(s.transfer_requested);
    }

    #[test]
    fn explicit_handoff_no_schedules_hangup() {
        let e = engine();
        let mut s = qa_state();
        e.generate_reply("c1", &mut s, "担当者お願いします", true);
        let reply = e.generate_reply("c1", &mut s, "結構です", true);
        assert_eq!(reply.template_ids, vec!["086", "087"]);
        assert!(!reply.transfer_requested);
        assert_eq!(s.phase, Phase::End);
        assert_eq!(reply.auto_hangup, Some(AutoHangup::Close));
    }

    #[test]
    fn handoff_without_route_offers_0605() {
        let e = engine();
        let mut s = qa_state();
        let reply = e.generate_reply("c1", &mut s, "担当者お願いします", false);
        assert_eq!(reply.template_ids, vec!["0605"]);
        assert_eq!(reply.label, "HANDOFF_UNAVAILABLE");
        assert_eq!(s.handoff_state, HandoffState::Idle);
        assert_eq!(s.meta.get("handoff_unavailable").unwrap(), "true");
        assert_eq!(s.phase, Phase::Qa);
    }

    #[test]
    fn two_unclear_turns_force_handoff() {
        let e = engine();
        let mut s = qa_state();
        s.handoff_prompt_sent = true; // disable the first-UNKNOWN offer

        let reply = e.generate_reply("c1", &mut s, "不明な発話", true);
        assert_eq!(reply.template_ids, vec!["110"]);
        assert_eq!(s.unclear_streak, 1);

        // the second unclear turn reaches the trigger and escalates to 0604
        let reply = e.generate_reply("c1", &mut s, "聞き取れない", true);
        assert_eq!(reply.template_ids, vec!["0604"]);
        assert_eq!(reply.intent, Intent::HandoffRequest);
        assert_eq!(s.handoff_state, HandoffState::Confirming);
        assert_eq!(s.meta.get("reason_for_handoff").unwrap(), "auto_unclear");
        assert_eq!(s.meta.get("unclear_streak_at_trigger").unwrap(), "2");
    }

    #[test]
    fn first_unknown_offers_handoff_once() {
        let e = engine();
        let mut s = qa_state();
        let reply = e.generate_reply("c1", &mut s, "不明な発話", true);
        assert_eq!(reply.template_ids, vec!["0604"]);
        assert!(s.handoff_prompt_sent);
        assert_eq!(s.handoff_state, HandoffState::Confirming);
    }

    #[test]
    fn handoff_done_strips_0604_and_104() {
        let e = engine();
        let mut s = qa_state();
        e.generate_reply("c1", &mut s, "担当者お願いします", true);
        e.generate_reply("c1", &mut s, "はい", true);
        assert!(s.transfer_requested);

        // transfer_requested stays true after YES, so the done+no-transfer
        // branch is for the NO case; simulate a post-decline QA turn instead.
        let mut declined = qa_state();
        e.generate_reply("c2", &mut declined, "担当者お願いします", true);
        e.generate_reply("c2", &mut declined, "結構です", true);
        declined.phase = Phase::Qa;
        let reply = e.generate_reply("c2", &mut declined, "他の店舗でも使えますか", true);
        assert!(!reply.template_ids.iter().any(|t| t == "0604" || t == "104"));
        assert!(!reply.template_ids.is_empty());
    }

    #[test]
    fn closing_yes_emits_104_and_moves_to_handoff() {
        let e = engine();
        let mut s = qa_state();
        s.phase = Phase::Closing;
        let reply = e.generate_reply("c1", &mut s, "はいお願いします", true);
        assert_eq!(reply.template_ids, vec!["060", "061", "062", "104"]);
        assert_eq!(s.phase, Phase::Handoff);
    }

    #[test]
    fn after_085_negative_moves_to_closing() {
        let e = engine();
        let mut s = qa_state();
        s.phase = Phase::After085;
        let reply = e.generate_reply("c1", &mut s, "大丈夫です", true);
        assert_eq!(reply.template_ids, vec!["013"]);
        assert_eq!(reply.intent, Intent::EndCall);
        assert_eq!(s.phase, Phase::Closing);
    }

    #[test]
    fn no_input_ladder_escalates() {
        let e = engine();
        let mut s = qa_state();
        assert_eq!(e.no_input_reply("c1", &mut s).template_ids, vec!["110"]);
        assert_eq!(e.no_input_reply("c1", &mut s).template_ids, vec!["111"]);
        assert_eq!(e.no_input_reply("c1", &mut s).template_ids, vec!["112"]);
        // streak caps at the limit and keeps emitting 112
        assert_eq!(e.no_input_reply("c1", &mut s).template_ids, vec!["112"]);
        assert_eq!(s.no_input_streak, 3);
    }

    #[test]
    fn price_answer_appends_085() {
        let e = engine();
        let mut s = qa_state();
        let reply = e.generate_reply("c1", &mut s, "月額いくらですか", true);
        assert_eq!(reply.template_ids, vec!["040", "085"]);
        assert_eq!(s.phase, Phase::After085);
    }

    #[test]
    fn end_call_schedules_close_hangup() {
        let e = engine();
        let mut s = qa_state();
        let reply = e.generate_reply("c1", &mut s, "もう大丈夫です以上です", true);
        assert_eq!(s.phase, Phase::End);
        assert_eq!(reply.auto_hangup, Some(AutoHangup::Close));
    }

    #[test]
    fn second_sales_call_ends() {
        let e = engine();
        let mut s = qa_state();
        let reply = e.generate_reply("c1", &mut s, "新しいサービスのご提案でお電話しました", true);
        assert_eq!(reply.intent, Intent::SalesCall);
        assert_ne!(s.phase, Phase::End);
        s.phase = Phase::Qa;
        let reply = e.generate_reply("c1", &mut s, "はい営業です", true);
        assert_eq!(reply.intent, Intent::SalesCall);
        assert_eq!(s.phase, Phase::End);
        assert_eq!(reply.template_ids, vec!["094", "088"]);
    }

    #[test]
    fn entry_trigger_leads_to_confirm_then_yes() {
        let e = engine();
        let mut s = ConversationState::new();
        let reply = e.generate_reply("c1", &mut s, "導入について聞きたいんですが", true);
        assert_eq!(reply.template_ids, vec!["006"]);
        assert_eq!(s.phase, Phase::EntryConfirm);

        // the affirmation stays with the phase flow, not the handoff path
        let reply = e.generate_reply("c1", &mut s, "はい", true);
        assert_eq!(reply.template_ids, vec!["010"]);
        assert_eq!(s.phase, Phase::Qa);
        assert_eq!(s.handoff_state, HandoffState::Idle);
    }

    #[test]
    fn entry_confirm_no_closes_the_call() {
        let e = engine();
        let mut s = ConversationState::new();
        e.generate_reply("c1", &mut s, "導入の相談で", true);
        assert_eq!(s.phase, Phase::EntryConfirm);
        let reply = e.generate_reply("c1", &mut s, "結構です", true);
        assert_eq!(reply.template_ids, vec!["087", "088"]);
        assert_eq!(s.phase, Phase::End);
        assert_eq!(reply.auto_hangup, Some(AutoHangup::Close));
    }

    #[test]
    fn waiting_phase_with_speech_delegates_to_qa() {
        let e = engine();
        let mut s = qa_state();
        s.phase = Phase::Waiting;
        let reply = e.generate_reply("c1", &mut s, "料金はいくらですか", true);
        assert_eq!(reply.intent, Intent::Price);
        assert!(reply.template_ids.contains(&"040".to_string()));
    }

    #[test]
    fn closing_no_winds_down() {
        let e = engine();
        let mut s = qa_state();
        s.phase = Phase::Closing;
        let reply = e.generate_reply("c1", &mut s, "また今度でいいです", true);
        assert_eq!(reply.template_ids, vec!["087", "088"]);
        assert_eq!(s.phase, Phase::End);
        assert_eq!(reply.auto_hangup, Some(AutoHangup::Close));
    }

    #[test]
    fn transfer_latch_survives_renewed_request() {
        let e = engine();
        let mut s = qa_state();
        e.generate_reply("c1", &mut s, "担当者お願いします", true);
        e.generate_reply("c1", &mut s, "はい", true);
        s.transfer_executed = true; // the session dispatched the command

        // a fresh request re-asks but must not clear the latch
        s.phase = Phase::Qa;
        let reply = e.generate_reply("c1", &mut s, "オペレーターに繋いでください", true);
        assert_eq!(reply.template_ids, vec!["0604"]);
        assert!(s.transfer_executed, "one-way latch must survive");
        assert_eq!(s.handoff_state, HandoffState::Confirming);
    }

    #[test]
    fn end_phase_emits_nothing() {
        let e = engine();
        let mut s = qa_state();
        s.phase = Phase::End;
        let reply = e.generate_reply("c1", &mut s, "もしもし", true);
        assert!(reply.template_ids.is_empty());
    }
}

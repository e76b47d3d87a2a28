//! Intent → template decision tables.
//!
//! Selection is stateless: it maps the classified intent (plus small text
//! sub-rules) to template ids. State-aware rewrites — stripping 0604/104
//! after handoff, appending the 085 follow-up, streak handling — live in the
//! engine, not here.

use rand::Rng;

use crate::intent::{Intent, normalize_asr_variants, normalize_text};

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// Selects the reply templates for one classified utterance.
pub fn select_template_ids(intent: Intent, text: &str) -> Vec<String> {
    let t = normalize_asr_variants(&normalize_text(text));
    let contains = |keywords: &[&str]| keywords.iter().any(|k| t.contains(k));

    match intent {
        Intent::NotHeard => ids(&["0602"]),
        Intent::HandoffYes => ids(&["081", "082"]),
        Intent::HandoffNo => ids(&["086", "087"]),
        Intent::SalesCall => {
            if contains(&["営業"]) {
                ids(&["094", "088"])
            } else {
                ids(&["093"])
            }
        }
        Intent::AiCallTopic => ids(&["0600"]),
        Intent::AiIdentity => ids(&["023_AI_IDENTITY"]),
        Intent::SystemExplain => ids(&["020"]),
        Intent::Busy => ids(&["090"]),
        Intent::CallbackRequest => ids(&["0601"]),
        Intent::SetupDifficulty => ids(&["0603"]),
        Intent::Dialect => ids(&["066"]),
        Intent::Interrupt => ids(&["065"]),
        Intent::Reservation => ids(&["070"]),
        Intent::MultiStore => ids(&["069"]),
        Intent::Greeting => ids(&["004"]),
        Intent::SystemInquiry => ids(&["006_SYS"]),
        Intent::Inquiry => ids(&["006"]),
        Intent::InquiryPassive => {
            // Soft probe for lukewarm leads; either wording is fine.
            if rand::rng().random_bool(0.5) {
                ids(&["089"])
            } else {
                ids(&["090"])
            }
        }
        Intent::Price => {
            if contains(&["初期費用"]) {
                ids(&["042"])
            } else if contains(&["最低契約", "最低利用"]) {
                ids(&["045"])
            } else {
                ids(&["040"])
            }
        }
        Intent::Setup => ids(&["060"]),
        Intent::Function => ids(&["023"]),
        Intent::Support => {
            if contains(&["不具合", "故障", "エラー", "障害"]) {
                ids(&["0285"])
            } else {
                ids(&["0284"])
            }
        }
        Intent::EndCall => ids(&["086"]),
        Intent::HandoffRequest => ids(&["0604"]),
        Intent::Unknown => ids(&["110"]),
    }
}

/// Template ids that count as a real answer: selecting any of them resets the
/// unclear streak.
pub const NORMAL_ANSWER_TEMPLATES: &[&str] = &[
    "006", "006_SYS", "010", "004", "005", "020", "021", "022", "023", "040", "041", "042", "060",
    "061", "070", "071", "072", "080", "081", "082", "084", "085", "086", "087", "088", "089",
    "090", "091", "092", "099", "100", "101", "102", "103", "104", "0600", "0601", "0602", "0603",
    "0604",
];

/// Intents that ask a factual question the templates can answer.
pub const QUESTION_INTENTS: &[Intent] = &[
    Intent::Price,
    Intent::SystemInquiry,
    Intent::Function,
    Intent::Support,
    Intent::AiIdentity,
    Intent::SystemExplain,
    Intent::Reservation,
    Intent::MultiStore,
    Intent::Dialect,
    Intent::CallbackRequest,
    Intent::SetupDifficulty,
    Intent::AiCallTopic,
    Intent::Setup,
];

/// Answer templates that warrant the "anything else?" 085 follow-up.
pub const ANSWER_TEMPLATES: &[&str] = &[
    "040", "041", "042", "043", "044", "045", "046", "047", "048", "049", "020", "021", "022",
    "023", "023_AI_IDENTITY", "024", "025", "026", "060", "061", "062", "063", "064", "065",
    "066", "067", "068", "069", "070", "071", "072", "0600", "0601", "0603", "0280", "0281",
    "0282", "0283", "0284", "0285",
];

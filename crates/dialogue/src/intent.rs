//! Rule-based intent classification for caller utterances.
//!
//! The classifier is a pure function over normalized text. Rules run in a
//! strict order; the first match wins. Keyword tables are closed sets tuned
//! against real call transcripts, so matching is plain substring containment
//! rather than regex.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Closed set of intent labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Unknown,
    NotHeard,
    Greeting,
    Inquiry,
    InquiryPassive,
    SystemInquiry,
    SystemExplain,
    AiIdentity,
    AiCallTopic,
    Price,
    Setup,
    SetupDifficulty,
    Function,
    Support,
    Reservation,
    MultiStore,
    Dialect,
    Interrupt,
    Busy,
    CallbackRequest,
    SalesCall,
    HandoffRequest,
    HandoffYes,
    HandoffNo,
    EndCall,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Unknown => "UNKNOWN",
            Intent::NotHeard => "NOT_HEARD",
            Intent::Greeting => "GREETING",
            Intent::Inquiry => "INQUIRY",
            Intent::InquiryPassive => "INQUIRY_PASSIVE",
            Intent::SystemInquiry => "SYSTEM_INQUIRY",
            Intent::SystemExplain => "SYSTEM_EXPLAIN",
            Intent::AiIdentity => "AI_IDENTITY",
            Intent::AiCallTopic => "AI_CALL_TOPIC",
            Intent::Price => "PRICE",
            Intent::Setup => "SETUP",
            Intent::SetupDifficulty => "SETUP_DIFFICULTY",
            Intent::Function => "FUNCTION",
            Intent::Support => "SUPPORT",
            Intent::Reservation => "RESERVATION",
            Intent::MultiStore => "MULTI_STORE",
            Intent::Dialect => "DIALECT",
            Intent::Interrupt => "INTERRUPT",
            Intent::Busy => "BUSY",
            Intent::CallbackRequest => "CALLBACK_REQUEST",
            Intent::SalesCall => "SALES_CALL",
            Intent::HandoffRequest => "HANDOFF_REQUEST",
            Intent::HandoffYes => "HANDOFF_YES",
            Intent::HandoffNo => "HANDOFF_NO",
            Intent::EndCall => "END_CALL",
        }
    }

    /// Any of the three handoff-flow labels.
    pub fn is_handoff(&self) -> bool {
        matches!(
            self,
            Intent::HandoffRequest | Intent::HandoffYes | Intent::HandoffNo
        )
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification context. Inside the handoff confirmation question the short
/// yes/no vocabularies are interpreted as HANDOFF_YES / HANDOFF_NO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifyContext {
    #[default]
    None,
    HandoffConfirming,
}

pub const GREETING_KEYWORDS: &[&str] =
    &["もしもし", "こんにちは", "こんばんは", "おはよう", "はじめまして"];

// Handoff vocabulary: nouns (who), verbs (connect/switch), request phrases.
// ASR-variant normalization folds 繋いで/繋げて/詰めて onto つないで first.
pub const HANDOFF_NOUNS: &[&str] = &[
    "オペレーター",
    "オペレータ",
    "担当者",
    "たんとうしゃ",
    "担当の者",
    "当者",
    "人間",
    "ひと",
    "人",
    "スタッフ",
    "社員",
    "窓口",
];

pub const HANDOFF_VERBS: &[&str] = &[
    "つないで",
    "つなげて",
    "代わって",
    "替わって",
    "変わって",
    "回して",
    "まわして",
];

pub const HANDOFF_REQUEST_PHRASES: &[&str] =
    &["お願いします", "お願い", "ください", "もらえますか", "してほしい"];

pub const INQUIRY_KEYWORDS: &[&str] = &[
    "ホームページ",
    "hp",
    "lp",
    "メール",
    "dm",
    "導入",
    "しすてむ",
    "システム",
    "サービス",
    "詳しく",
    "案内",
    "相談",
];

pub const PRICE_KEYWORDS: &[&str] = &[
    "金額",
    "料金",
    "値段",
    "月額",
    "費用",
    "初期費用",
    "最低契約",
    "解約",
    "返金",
    "無料",
    "トライアル",
    "効果",
    "コスト",
    "削減",
    "人件費",
    "ストレス",
];

pub const SETUP_KEYWORDS: &[&str] = &[
    "導入したら",
    "いつから",
    "どれくらい",
    "どうやって",
    "設定",
    "初期設定",
    "セットアップ",
    "パソコン",
    "pc",
    "スマホ",
    "電話番号",
    "転送",
    "環境",
    "すぐ使える",
];

pub const FUNCTION_KEYWORDS: &[&str] = &[
    "aiの声",
    "声変え",
    "テンプレ",
    "語尾",
    "聞き取り精度",
    "間違ったら",
    "クレーム",
    "転送",
    "予約管理",
    "予約の変更",
    "キャンセル",
    "飲食",
    "美容院",
    "施術",
    "席",
    "スタッフ",
    "個人情報",
    "セキュリティ",
    "録音",
    "ダブルブッキング",
    "方言",
    "精度",
    "カスタマイズ",
];

pub const SUPPORT_KEYWORDS: &[&str] =
    &["サポート", "不具合", "エラー", "トラブル", "障害", "バグ"];

pub const END_CALL_KEYWORDS: &[&str] = &[
    "もうだいじょうぶ",
    "大丈夫です",
    "他はない",
    "以上です",
    "けっこうです",
    "結構です",
    "そんなもん",
    "大丈夫",
    "もういい",
    "今日は聞くだけ",
    "また考えます",
    "やめときます",
    "やめておきます",
    "また今度",
    "一旦やめて",
];

pub const YES_KEYWORDS: &[&str] = &[
    "はい",
    "ええ",
    "お願いします",
    "お願い",
    "承知",
    "はいお願いします",
];

pub const NO_KEYWORDS: &[&str] = &["必要ない", "いりません", "間に合ってます"];

/// Refusals accepted while the 0604 confirmation question is pending.
pub const HANDOFF_NO_KEYWORDS: &[&str] = &[
    "今日はいい",
    "今日は聞くだけ",
    "また考える",
    "また考えます",
    "検討する",
    "やめとく",
    "やめておく",
    "また今度",
    "不要",
    "いりません",
    "結構です",
    "けっこうです",
    "大丈夫です",
    "大丈夫",
    "遠慮します",
    "やめます",
    "また連絡",
    "いらない",
    "やっぱりいい",
];

/// Lukewarm-lead markers (still considering, just looking).
pub const LOW_INTENT_KEYWORDS: &[&str] = &[
    "いやまだそこまでは",
    "検討中",
    "様子を見てる",
    "今のところ考えてない",
    "導入までは考えてない",
    "検討してるところ",
    "迷っている",
    "まだ決めてない",
    "検討中です",
    "考え中",
    "様子見",
    "まだそこまでは",
    "そこまでは考えてない",
    "まだ考えてない",
];

const NOISE_MARKERS: &[&str] = &["ゴニョゴニョ", "ごにょごにょ", "ごにょ", "ゴニョ"];
const NOISE_PUNCTUATION: &[char] = &['…', '。', '、', '.', ','];

const SYSTEM_TOPIC_PHRASES: &[&str] = &[
    "システムについて",
    "システムの",
    "システムを",
    "システムが",
    "システムに",
    "システムは",
    "システムで",
];

const SALES_MARKERS: &[&str] = &["営業", "ご提案", "サービスのご提案", "新しいサービス"];

const SETUP_DIFFICULTY_CONTEXT: &[&str] =
    &["システム", "この", "その", "導入", "初期", "設定", "セットアップ"];

// ASR mishearing fixups applied after NFKC normalization. Ordered; earlier
// rewrites feed later ones (繋いでない must run before 繋いで).
const ASR_VARIANTS: &[(&str, &str)] = &[
    ("にんげん", "人間"),
    ("かわって", "変わって"),
    ("かわて", "変わって"),
    ("かわつて", "変わって"),
    ("詰めて", "つないで"),
    ("つめて", "つないで"),
    ("繋いでない", "つないで"),
    ("つないでない", "つないで"),
    ("繋ない", "つないで"),
    ("繋いで", "つないで"),
    ("繋げて", "つないで"),
];

/// NFKC, lowercase, strip ASCII and ideographic spaces.
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    text.nfkc()
        .collect::<String>()
        .to_lowercase()
        .replace([' ', '\u{3000}'], "")
}

/// Folds known ASR mishearings onto canonical spellings.
pub fn normalize_asr_variants(text: &str) -> String {
    let mut result = text.to_string();
    for (src, dst) in ASR_VARIANTS {
        result = result.replace(src, dst);
    }
    result
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Classifies one caller utterance. First matching rule wins.
pub fn classify_intent(text: &str, context: ClassifyContext) -> Intent {
    let t = normalize_asr_variants(&normalize_text(text));
    if t.is_empty() {
        return Intent::Unknown;
    }

    // Noise before anything else: filler markers or punctuation-heavy text.
    if contains_any(&t, NOISE_MARKERS) {
        return Intent::NotHeard;
    }
    let punct: usize = NOISE_PUNCTUATION
        .iter()
        .map(|c| t.matches(*c).count())
        .sum();
    if punct >= 3 {
        return Intent::NotHeard;
    }

    // While the 0604 question is pending, short affirmations and refusals
    // resolve the confirmation directly.
    if context == ClassifyContext::HandoffConfirming {
        if contains_any(&t, YES_KEYWORDS) {
            return Intent::HandoffYes;
        }
        if contains_any(&t, HANDOFF_NO_KEYWORDS) || contains_any(&t, NO_KEYWORDS) {
            return Intent::HandoffNo;
        }
    }

    // Explicit system topic wins over the handoff heuristic: "システムについて
    // 詳しい人に..." is a system question, not a transfer request.
    if contains_any(&t, SYSTEM_TOPIC_PHRASES) {
        return Intent::SystemInquiry;
    }

    // Handoff heuristic: noun + request phrase, noun + connect verb, or the
    // common talk-to-a-human combinations.
    let has_noun = contains_any(&t, HANDOFF_NOUNS);
    if has_noun
        && (contains_any(&t, HANDOFF_REQUEST_PHRASES) || contains_any(&t, HANDOFF_VERBS))
    {
        return Intent::HandoffRequest;
    }
    if t.contains("担当者") && (t.contains("お願い") || t.contains("おねがい") || t.contains("話"))
    {
        return Intent::HandoffRequest;
    }
    if (t.contains("人間") || t.contains("オペレーター"))
        && (t.contains("話") || t.contains("繋") || t.contains("代"))
    {
        return Intent::HandoffRequest;
    }

    if contains_any(&t, LOW_INTENT_KEYWORDS) {
        return Intent::InquiryPassive;
    }

    if contains_any(&t, SALES_MARKERS) {
        return Intent::SalesCall;
    }

    if contains_any(&t, YES_KEYWORDS) {
        return Intent::HandoffYes;
    }
    if contains_any(&t, NO_KEYWORDS) {
        return Intent::HandoffNo;
    }

    if contains_any(&t, &["ai電話", "aiの電話", "aiの件", "ai電話の件"]) {
        return Intent::AiCallTopic;
    }
    if contains_any(
        &t,
        &["あなたはai", "aiですか", "自己紹介", "あなたは誰", "aiがやってる"],
    ) {
        return Intent::AiIdentity;
    }

    // "Is the setup hard?" needs a difficulty word plus setup context so that
    // a bare 「難しい」 complaint about something else stays UNKNOWN-routed.
    if (t.contains('難') || t.contains("むず")) && contains_any(&t, SETUP_DIFFICULTY_CONTEXT) {
        return Intent::SetupDifficulty;
    }

    if contains_any(
        &t,
        &[
            "どういうシステム",
            "どんなシステム",
            "どういうサービス",
            "どんなサービス",
            "これどういう",
            "どういう",
        ],
    ) {
        return Intent::SystemExplain;
    }

    if contains_any(&t, &["混んでます", "混んでる", "込み合って", "混雑", "混ん"]) {
        return Intent::Busy;
    }
    if contains_any(
        &t,
        &["折り返し", "折り返して", "かけ直し", "かけなおし", "折り返しもらえ"],
    ) {
        return Intent::CallbackRequest;
    }

    if contains_any(&t, &["関西弁", "方言", "イントネーション"]) {
        return Intent::Dialect;
    }
    if contains_any(
        &t,
        &["口挟ん", "割り込ん", "途中で話しても", "途中で口挟ん"],
    ) {
        return Intent::Interrupt;
    }

    if contains_any(
        &t,
        &["予約", "キャンセル", "ダブルブッキング", "席", "スタッフ別", "何席"],
    ) {
        return Intent::Reservation;
    }

    if contains_any(
        &t,
        &[
            "店舗いくつか",
            "複数店舗",
            "別店舗",
            "複数番号",
            "複数拠点",
            "全部まとめて",
            "店舗いくつ",
            "他の店舗でも",
        ],
    ) {
        return Intent::MultiStore;
    }

    if contains_any(&t, &["やめときます", "やめておきます", "また今度", "一旦やめて"]) {
        return Intent::EndCall;
    }

    if contains_any(&t, GREETING_KEYWORDS) {
        return Intent::Greeting;
    }
    if contains_any(&t, &["セキュリティ", "個人情報"]) || (t.contains("情報") && t.contains("保存"))
    {
        return Intent::Function;
    }
    if contains_any(&t, &["他の店", "他店", "他の店舗"]) {
        return Intent::Function;
    }
    if t.contains("転送") && !t.contains("番号") {
        return Intent::Function;
    }
    if contains_any(&t, END_CALL_KEYWORDS) {
        return Intent::EndCall;
    }
    if contains_any(&t, PRICE_KEYWORDS) {
        return Intent::Price;
    }
    if contains_any(&t, SETUP_KEYWORDS) {
        return Intent::Setup;
    }
    if contains_any(&t, FUNCTION_KEYWORDS) {
        return Intent::Function;
    }
    if contains_any(&t, SUPPORT_KEYWORDS) {
        return Intent::Support;
    }
    if contains_any(&t, INQUIRY_KEYWORDS) {
        return Intent::Inquiry;
    }

    Intent::Unknown
}

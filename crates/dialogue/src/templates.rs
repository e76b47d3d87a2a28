//! Voice-line template registry.
//!
//! Templates are identified by short string ids ("004", "0604", ...). The
//! system-default table is compiled in; a per-client `templates.json` can
//! override or extend it. Runtime playback uses pre-rendered WAV files from
//! the client's audio directory — `text` is only spoken by the offline TTS
//! regeneration tooling and echoed into call logs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_VOICE: &str = "ja-JP-Neural2-B";

/// (id, text, rate, wait_time_after, auto_hangup)
const SYSTEM_TEMPLATES: &[(&str, &str, f32, Option<f32>, bool)] = &[
    ("003", "はい。", 1.1, None, false),
    ("004", "もしもし。", 1.1, None, false),
    ("005", "ありがとうございます。どのようなご用件でしょうか？", 1.1, None, false),
    ("006", "導入のご相談でよろしかったでしょうか？", 1.1, Some(1.8), false),
    ("006_SYS", "ありがとうございます。システムについてですね。どのような点が気になっていますか？", 1.1, None, false),
    ("007", "システムの詳細についてでよろしかったでしょうか？", 1.1, None, false),
    ("008", "料金のご相談でよろしかったでしょうか？", 1.1, None, false),
    ("009", "その他のご相談でよろしかったでしょうか？", 1.1, None, false),
    ("010", "どのような点が気になっておりますでしょうか？", 1.1, None, false),
    ("011", "システムのどの部分についてお伺いでしょうか？", 1.1, None, false),
    ("012", "料金のどの項目についてお伺いしましょうか？", 1.1, None, false),
    ("013", "導入までの流れについてご案内いたしましょうか？", 1.1, None, false),
    ("014", "AIの応答精度についてでしょうか？", 1.1, None, false),
    ("015", "録音・個人情報の取り扱いについてでしょうか？", 1.1, None, false),
    ("016", "営業電話フィルタについてでしょうか？", 1.1, None, false),
    ("017", "カスタマイズの可否についてでしょうか？", 1.1, None, false),
    ("018", "導入スピードについてのご質問でしょうか？", 1.1, None, false),
    ("019", "その他のサービス内容でしょうか？", 1.1, None, false),
    ("020", "当社のAI電話は二十四時間三百六十五日対応で、一次受付から要件確認まで自動で行います。", 1.1, None, false),
    ("021", "誤案内防止のため、ルールベース方式を採用しています。", 1.1, None, false),
    ("022", "想定外の内容は、全て担当者へ即転送する安全設計です。", 1.1, None, false),
    ("023", "AIが電話応対し、必要に応じて担当者へ引き継ぎます。", 1.1, None, false),
    ("023_AI_IDENTITY", "はい、私がAIで自動応答させていただいております。内容によっては担当者におつなぎする場合もございますが、わかる範囲でご案内いたします。", 1.1, None, false),
    ("024", "個人情報は一切保持せず、その場で処理のみ行います。", 1.1, None, false),
    ("025", "営業電話のフィルタリングにも対応しております。", 1.1, None, false),
    ("026", "お客様ごとに応答ルールと音声を調整し、精度を継続的に改善いたします。", 1.1, None, false),
    ("027", "初期費用は不要で、月額二十万円と通話料のみで運用可能です。", 1.1, None, false),
    ("028", "解約はいつでも可能で、最低利用期間はございません。", 1.1, None, false),
    ("029", "導入後一週間以内で動作不良などあれば全額返金が可能です。", 1.1, None, false),
    ("040", "料金は月額二十万円となります。", 1.1, None, false),
    ("041", "通話料は一分あたり約三円から四円ほどです。", 1.1, None, false),
    ("042", "初期費用は一切かかりません。", 1.1, None, false),
    ("043", "導入時に当月の日割りと翌月分を合わせて請求いたします。", 1.1, None, false),
    ("044", "一週間以内は全額返金保証がございます。", 1.1, None, false),
    ("045", "最低契約期間はございません。", 1.1, None, false),
    ("046", "月途中でもすぐにご解約いただけます。", 1.1, None, false),
    ("047", "追加費用なしで24時間稼働いたします。", 1.1, None, false),
    ("048", "社員教育やトレーニングコストは不要です。", 1.1, None, false),
    ("049", "無人化によるコスト削減が可能です。", 1.1, None, false),
    ("060", "最短即日から導入が可能です。", 1.1, None, false),
    ("061", "必要なのは転送先番号のご指定のみです。", 1.1, None, false),
    ("062", "全てクラウドで動作し、機材の設置は不要です。", 1.1, None, false),
    ("063", "録音データは安全に管理されます。", 1.1, None, false),
    ("064", "AIは回答を外部へ送信せず、誤案内を防ぐ構造です。", 1.1, None, false),
    ("065", "リアルタイムで発話割り込みに対応いたします。", 1.1, None, false),
    ("066", "方言やイントネーションにも柔軟に対応いたします。", 1.1, None, false),
    ("067", "ルールベース方式のため誤案内リスクが極端に低い設計です。", 1.1, None, false),
    ("068", "毎日ログを分析し、翌日には応答精度を改善します。", 1.1, None, false),
    ("069", "複数拠点・複数番号の管理にも対応しております。", 1.1, None, false),
    ("070", "予約の取得や変更、キャンセルにも柔軟に対応可能です。", 1.1, None, false),
    ("071", "ダブルブッキングを避けるように自動で枠を管理します。", 1.1, None, false),
    ("072", "席数やスタッフごとの予約枠も設定いただけます。", 1.1, None, false),
    ("080", "必要に応じて担当者へおつなぎいたします。", 1.1, None, false),
    ("081", "それでは担当者におつなぎいたします。", 1.1, None, false),
    ("082", "しばらくお待ちください。", 1.1, None, false),
    ("083", "担当者が不在の場合は折り返しのご案内となります。", 1.1, None, false),
    ("084", "ご質問は以上でよろしいでしょうか？", 1.1, None, false),
    ("085", "ほかに気になる点はありますか？", 1.1, None, false),
    ("086", "お電話ありがとうございました。", 1.1, None, false),
    ("087", "また何かあればいつでもご相談くださいね。", 1.1, None, false),
    ("088", "失礼いたします。", 1.1, None, false),
    ("089", "ありがとうございます。ちなみに、どのあたりがご不安でしたか？", 1.1, None, false),
    ("090", "かしこまりました。どこか気になる点や迷っている部分はございますか？", 1.1, None, false),
    ("091", "折り返しご希望でしょうか？", 1.1, None, false),
    ("092", "ただいま確認いたします。少しお待ちください。", 1.1, None, false),
    ("093", "営業目的のお電話でしょうか？", 1.1, None, false),
    ("094", "恐れ入りますが、営業目的のご連絡はお受けしておりません。", 1.1, None, false),
    ("095", "担当部署に確認いたします。", 1.1, None, false),
    ("096", "特定サービスに関するお問い合わせでしょうか？", 1.1, None, false),
    ("097", "本日の対応可能な時間帯をご案内いたします。", 1.1, None, false),
    ("098", "順番にご案内しておりますのでお待ちください。", 1.1, None, false),
    ("099", "他にお手伝いできることはございますか？", 1.1, None, false),
    ("100", "初めてのご相談でよろしかったでしょうか？", 1.1, None, false),
    ("101", "料金についてのお問い合わせでよろしかったでしょうか？", 1.1, None, false),
    ("102", "キャンセルのご相談でよろしかったでしょうか？", 1.1, None, false),
    ("103", "お問い合わせでよろしかったでしょうか？", 1.1, None, false),
    ("104", "担当者におつなぎしてよろしかったでしょうか？", 1.1, None, false),
    ("110", "もしもし？お声が遠いようです。もう一度お願いします。", 1.0, Some(3.0), false),
    ("111", "お電話聞こえていますか？", 1.0, Some(3.0), false),
    ("112", "お声が確認できませんので、このまま切らせていただきます。", 1.0, Some(1.0), true),
    ("113", "雑音が入ってしまったため、改めてお願いできますか？", 1.1, None, false),
    ("114", "ご要件をもう一度お伺いしてもよろしいでしょうか？", 1.1, None, false),
    ("115", "どの内容についてのお問い合わせでしょうか？", 1.1, None, false),
    ("116", "はい、どういった件かもう少し詳しくお聞かせいただけますか？", 1.1, None, false),
    ("117", "今のお言葉、確認のため繰り返していただけますか？", 1.1, None, false),
    ("118", "すみません、電話が遠いようです。もう一度お願いします。", 1.1, None, false),
    ("119", "恐れ入りますが、何についてのお電話か改めてお伺いしてもよろしいでしょうか？", 1.1, None, false),
    ("0280", "私たちのAI電話は、飲食、美容院、クリニックなど幅広く対応しています。", 1.1, None, false),
    ("0281", "個人店や小規模店舗でも導入されています。", 1.1, None, false),
    ("0282", "主要な予約アプリとは連動可能です。内容に応じて追加費用を頂いております。", 1.1, None, false),
    ("0283", "飲食、美容、医療など多くの店舗で導入実績がございます。", 1.1, None, false),
    ("0284", "導入後もチャット・電話でのサポートが可能です。", 1.1, None, false),
    ("0285", "不具合があれば即日対応し、自動復旧機能も備えています。", 1.1, None, false),
    ("0600", "AI電話の件ですね。どのあたりが気になっておりますでしょうか？", 1.1, None, false),
    ("0601", "承知いたしました。折り返し希望として承ります。お名前とご連絡先をお伺いしてもよろしいでしょうか？", 1.1, None, false),
    ("0602", "恐れ入ります、少し聞き取りづらかったようです。もう一度お願いできますでしょうか？", 1.1, None, false),
    ("0603", "初期設定はこちらで代行いたしますので、お店側の作業はほとんどございません。スマホだけでもご利用いただけますのでご安心ください。", 1.1, None, false),
    ("0604", "私では詳細のご案内が難しい内容のため、担当者におつなぎしてもよろしいでしょうか？", 1.1, None, false),
    ("0605", "現在担当者が不在のため、このままAIがご案内いたします。ご質問をお聞かせください。", 1.1, None, false),
];

#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub text: String,
    pub voice: String,
    pub rate: f32,
    /// Pause the playback queue for this many seconds after the line.
    pub wait_time_after: Option<f32>,
    /// Schedule hangup once this line has finished playing.
    pub auto_hangup: bool,
}

/// Per-client JSON override entry. Absent fields keep the system default.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateOverride {
    pub text: Option<String>,
    pub voice: Option<String>,
    pub rate: Option<f32>,
    pub wait_time_after: Option<f32>,
    pub auto_hangup: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template overrides {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid template overrides {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl TemplateRegistry {
    /// Registry holding only the compiled-in system defaults.
    pub fn system_default() -> Self {
        let templates = SYSTEM_TEMPLATES
            .iter()
            .map(|(id, text, rate, wait, hang)| {
                (
                    (*id).to_string(),
                    Template {
                        id: (*id).to_string(),
                        text: (*text).to_string(),
                        voice: DEFAULT_VOICE.to_string(),
                        rate: *rate,
                        wait_time_after: *wait,
                        auto_hangup: *hang,
                    },
                )
            })
            .collect();
        Self { templates }
    }

    /// System defaults merged with a client's `templates.json`, if present.
    /// A missing file is fine; a malformed one is an error.
    pub fn load_for_client(clients_root: &Path, client_id: &str) -> Result<Self, TemplateError> {
        let mut registry = Self::system_default();
        let path = clients_root
            .join(client_id)
            .join("config")
            .join("templates.json");
        if !path.exists() {
            return Ok(registry);
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;
        let overrides: HashMap<String, TemplateOverride> =
            serde_json::from_str(&raw).map_err(|source| TemplateError::Parse {
                path: path.clone(),
                source,
            })?;
        registry.apply_overrides(overrides);
        tracing::info!(client_id, path = %path.display(), "client template overrides loaded");
        Ok(registry)
    }

    pub fn apply_overrides(&mut self, overrides: HashMap<String, TemplateOverride>) {
        for (id, over) in overrides {
            let entry = self
                .templates
                .entry(id.clone())
                .or_insert_with(|| Template {
                    id: id.clone(),
                    text: String::new(),
                    voice: DEFAULT_VOICE.to_string(),
                    rate: 1.1,
                    wait_time_after: None,
                    auto_hangup: false,
                });
            if let Some(text) = over.text {
                entry.text = text;
            }
            if let Some(voice) = over.voice {
                entry.voice = voice;
            }
            if let Some(rate) = over.rate {
                entry.rate = rate;
            }
            if over.wait_time_after.is_some() {
                entry.wait_time_after = over.wait_time_after;
            }
            if let Some(auto_hangup) = over.auto_hangup {
                entry.auto_hangup = auto_hangup;
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Joins the captions of known templates with single spaces. Log-only;
    /// ids without a registry entry (e.g. the audio-only intro lines) are
    /// skipped.
    pub fn render_text(&self, ids: &[String]) -> String {
        ids.iter()
            .filter_map(|id| self.lookup(id))
            .map(|t| t.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Picks the playable WAV for a template: `<id>.wav`, then `<id>_8k.wav`,
/// then `<id>_8k_norm.wav`. Returns the first that exists.
pub fn resolve_audio_path(audio_dir: &Path, template_id: &str) -> Option<PathBuf> {
    let candidates = [
        audio_dir.join(format!("{template_id}.wav")),
        audio_dir.join(format!("{template_id}_8k.wav")),
        audio_dir.join(format!("{template_id}_8k_norm.wav")),
    ];
    candidates.into_iter().find(|p| p.exists())
}

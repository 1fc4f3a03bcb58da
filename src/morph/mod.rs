//! 形態素列から종결어미・記号・반말判定を取り出す後処理ルール。
//!
//! タグ付け結果（[`Morpheme`] 列）を入力に、文の分割と終結語尾の抽出を行う。
//! 対話的な補正は [`Reviewer`] を通して呼び出し側に委ねる。

pub mod interactive;
pub mod segment;

use std::collections::HashSet;
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tagger::Morpheme;

pub use interactive::TerminalReviewer;
pub use segment::{
    Decision, RefineOutcome, Reviewer, Segment, SegmentOutcome, refine_tokens,
    segment_sentence_by_endings, token_positions,
};

/// 終結語尾として集計するタグ。
pub const FINAL_ENDING_TAGS: [&str; 2] = ["EF", "ECF"];
/// 文を分割する基準になるタグ。
pub const SPLIT_ENDING_TAGS: [&str; 1] = ["EF"];

const POLITE_MARKERS: [&str; 7] = ["요", "죠", "습니다", "ㅂ니다", "까요", "나요", "인가요"];

static EMOTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ㄱ-ㅎㅏ-ㅣ]+").expect("valid emotion regex"));
static PUNCTUATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?!~….]+").expect("valid punctuation regex"));
static POLITE_MATCHER: LazyLock<AhoCorasick> =
    LazyLock::new(|| AhoCorasick::new(POLITE_MARKERS).expect("valid polite markers"));

pub(crate) fn is_final_ending_tag(tag: &str) -> bool {
    FINAL_ENDING_TAGS.contains(&tag)
}

pub(crate) fn is_split_ending_tag(tag: &str) -> bool {
    SPLIT_ENDING_TAGS.contains(&tag)
}

/// 終結語尾の直後に付いて一緒に扱う形態素（助詞・先語末語尾）。
pub(crate) fn is_ending_suffix_tag(tag: &str) -> bool {
    tag.starts_with('J') || tag == "EP"
}

/// EF/ECF とその直後に続く助詞・EP を出現順に抽出する。
#[must_use]
pub fn extract_final_endings(tokens: &[Morpheme]) -> Vec<Morpheme> {
    let mut endings = Vec::new();
    let mut idx = 0;
    while idx < tokens.len() {
        if is_final_ending_tag(&tokens[idx].tag) {
            endings.push(tokens[idx].clone());
            let mut lookahead = idx + 1;
            while lookahead < tokens.len() && is_ending_suffix_tag(&tokens[lookahead].tag) {
                endings.push(tokens[lookahead].clone());
                lookahead += 1;
            }
            idx = lookahead;
            continue;
        }
        idx += 1;
    }
    endings
}

/// テキスト中の句読点列と感情記号（자모の連続）を取り出す。
///
/// 各マッチは先頭3文字に切り詰め、重複を除いて出現順に返す。
/// 戻り値は `(punctuation, other_symbols)`。
#[must_use]
pub fn extract_symbols(text: &str) -> (Vec<String>, Vec<String>) {
    (
        unique_prefixes(&PUNCTUATION_REGEX, text),
        unique_prefixes(&EMOTION_REGEX, text),
    )
}

fn unique_prefixes(pattern: &Regex, text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut sequences = Vec::new();
    for found in pattern.find_iter(text) {
        let sequence: String = found.as_str().chars().take(3).collect();
        if !sequence.is_empty() && seen.insert(sequence.clone()) {
            sequences.push(sequence);
        }
    }
    sequences
}

/// 終結語尾の列から반말かどうかを判定する。
///
/// 존댓말の語尾が1つ以上あり、かつ반말語尾の半数以上ある場合は `false`。
#[must_use]
pub fn is_banmal<S: AsRef<str>>(endings: &[S]) -> bool {
    if endings.is_empty() {
        return false;
    }

    let polite = endings
        .iter()
        .filter(|morph| POLITE_MATCHER.is_match(morph.as_ref()))
        .count();
    let casual = endings.len() - polite;

    #[allow(clippy::cast_precision_loss)]
    let polite_dominates = polite > 0 && polite as f64 >= casual as f64 * 0.5;
    !polite_dominates
}

/// 表記ゆれのある語尾を代表形にそろえる。対応表にない語尾はそのまま返す。
#[must_use]
pub fn normalize_ending(morph: &str) -> &str {
    match morph {
        "ㅁ" | "음" | "임" => "(으)ㅁ",
        "ㄴ" | "은" => "(으)ㄴ",
        "ㄹ" | "을" => "(으)ㄹ",
        "ㄹ까" | "을까" => "(으)ㄹ까",
        "ㅂ니다" | "습니다" => "ㅂ니다",
        "어라" | "아라" | "라" => "어/아라",
        "어" | "아" => "어/아",
        "은데" | "ㄴ데" => "(으)ㄴ데",
        "어서" | "아서" => "어/아서",
        other => other,
    }
}

/// 語尾列の末尾を「実際の終結語尾」として取り出す。
///
/// 末尾が補助詞（JX）なら直前の語尾と合わせて2つ、それ以外は末尾1つ。
#[must_use]
pub fn build_real_ending(endings: &[Morpheme]) -> Vec<Morpheme> {
    match endings {
        [] => Vec::new(),
        [.., before, last] if last.tag == "JX" => vec![before.clone(), last.clone()],
        [.., last] => vec![last.clone()],
    }
}

/// 要手動確認の判定基準。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCheck {
    /// 形態素処理ステージ: 最小確率 < 0.95 または未知語あり
    Strict,
    /// 修正取り込み時: 末尾確率 < 0.7 または最小確率 < 0.3
    Corrected,
}

/// 分割後の1文ぶんの分析結果。`morph_results` 列の要素。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceResult {
    pub sentence: String,
    #[serde(default)]
    pub endings: Vec<Morpheme>,
    #[serde(default)]
    pub punctuation: Vec<String>,
    #[serde(default)]
    pub other_symbols: Vec<String>,
    #[serde(default = "one")]
    pub min_prob: f64,
    #[serde(default = "one")]
    pub last_token_prob: f64,
    #[serde(default)]
    pub has_oov: bool,
    #[serde(default)]
    pub needs_manual_intent: bool,
}

fn one() -> f64 {
    1.0
}

impl SentenceResult {
    /// 文と形態素列から分析結果を組み立てる。
    ///
    /// 形態素がない場合の確率は `Strict` では 0、`Corrected` では 1 として扱う。
    #[must_use]
    pub fn analyze(sentence: &str, tokens: &[Morpheme], check: ManualCheck) -> Self {
        let empty_prob = match check {
            ManualCheck::Strict => 0.0,
            ManualCheck::Corrected => 1.0,
        };
        let min_prob = tokens
            .iter()
            .map(|token| token.probability)
            .reduce(f64::min)
            .unwrap_or(empty_prob);
        let last_token_prob = tokens.last().map_or(empty_prob, |token| token.probability);
        let has_oov = tokens.iter().any(|token| token.oov);
        let (punctuation, other_symbols) = extract_symbols(sentence);

        let needs_manual_intent = match check {
            ManualCheck::Strict => min_prob < 0.95 || has_oov,
            ManualCheck::Corrected => last_token_prob < 0.7 || min_prob < 0.3,
        };

        Self {
            sentence: sentence.to_string(),
            endings: extract_final_endings(tokens),
            punctuation,
            other_symbols,
            min_prob,
            last_token_prob,
            has_oov,
            needs_manual_intent,
        }
    }

    /// 分析結果が得られなかった行の代替結果（全文1件、要確認）。
    #[must_use]
    pub fn fallback(full_text: &str) -> Self {
        Self {
            sentence: full_text.to_string(),
            endings: Vec::new(),
            punctuation: Vec::new(),
            other_symbols: Vec::new(),
            min_prob: 1.0,
            last_token_prob: 1.0,
            has_oov: false,
            needs_manual_intent: true,
        }
    }

    /// タグ付けに失敗した文の結果（確率0、要確認）。
    #[must_use]
    pub fn failed(sentence: &str) -> Self {
        Self {
            min_prob: 0.0,
            last_token_prob: 0.0,
            ..Self::fallback(sentence)
        }
    }

    /// 語尾の形態素だけを返す。
    #[must_use]
    pub fn ending_morphs(&self) -> Vec<&str> {
        self.endings.iter().map(|e| e.text.as_str()).collect()
    }
}

//! `intent_*.csv` を集計し、커뮤니티ごとの語尾分布と独立性検定の結果を書き出す。

pub mod chart;
pub mod report;
pub mod stats;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DataLayout;
use crate::morph::{is_banmal, normalize_ending};
use crate::pipeline::intent::{IntentRow, OUTPUT_PREFIX as INTENT_PREFIX};
use crate::util::dataset::{read_records, stage_files};

pub use stats::{ChiSquareResult, ContingencyTable, chi_square_test};

pub const NO_ENDING: &str = "(none)";
pub const OTHER_ENDINGS: &str = "(other)";
/// 신조어として数える語尾。
pub const NEOLOGISM_ENDINGS: [&str; 3] = ["긔", "노", "슨"];
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// 반말の文だけを集計する
    pub banmal_only: bool,
    pub top_k: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            banmal_only: false,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// 커뮤니티1つぶんの集計。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommunityStats {
    pub community: String,
    pub sentences: u64,
    pub casual_sentences: u64,
    pub sentences_with_punctuation: u64,
    pub endings: BTreeMap<String, u64>,
    pub punctuation: BTreeMap<String, u64>,
    pub symbols: BTreeMap<String, u64>,
    pub neologisms: BTreeMap<String, u64>,
}

impl CommunityStats {
    fn new(community: &str) -> Self {
        Self {
            community: community.to_string(),
            neologisms: NEOLOGISM_ENDINGS.iter().map(|e| ((*e).to_string(), 0)).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ratio(&self, count: u64) -> f64 {
        if self.sentences == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = count as f64 / self.sentences as f64;
        ratio
    }

    #[must_use]
    pub fn casual_ratio(&self) -> f64 {
        self.ratio(self.casual_sentences)
    }

    fn push(&mut self, row: &IntentRow, casual: bool) {
        self.sentences += 1;
        if casual {
            self.casual_sentences += 1;
        }
        *self.endings.entry(ending_label(row)).or_default() += 1;

        let punctuation = row.punctuation_marks();
        if !punctuation.is_empty() {
            self.sentences_with_punctuation += 1;
        }
        for mark in punctuation {
            *self.punctuation.entry(mark).or_default() += 1;
        }
        for mark in row.symbol_marks() {
            *self.symbols.entry(mark).or_default() += 1;
        }
        for morpheme in row.all_ending_morphemes() {
            if let Some(count) = self.neologisms.get_mut(morpheme.text.as_str()) {
                *count += 1;
            }
        }
    }
}

/// `real_ending` の形態素を代表形にして `+` でつないだラベル。
#[must_use]
pub fn ending_label(row: &IntentRow) -> String {
    let morphemes = row.real_ending_morphemes();
    if morphemes.is_empty() {
        return NO_ENDING.to_string();
    }
    morphemes
        .iter()
        .map(|m| normalize_ending(&m.text))
        .collect::<Vec<_>>()
        .join("+")
}

fn is_casual(row: &IntentRow) -> bool {
    let endings: Vec<String> = row.all_ending_morphemes().into_iter().map(|m| m.text).collect();
    is_banmal(&endings)
}

/// 行を커뮤니티ごとに集計する。`banmal_only` なら반말の文以外を捨てる。
#[must_use]
pub fn aggregate(rows: &[IntentRow], banmal_only: bool) -> BTreeMap<String, CommunityStats> {
    let mut stats: BTreeMap<String, CommunityStats> = BTreeMap::new();
    for row in rows {
        let casual = is_casual(row);
        if banmal_only && !casual {
            continue;
        }
        stats
            .entry(row.community.clone())
            .or_insert_with(|| CommunityStats::new(&row.community))
            .push(row, casual);
    }
    stats
}

/// 全体の出現数の多い順に上位 `top_k` 個の語尾ラベル。同数はラベル順。
#[must_use]
pub fn top_endings(stats: &BTreeMap<String, CommunityStats>, top_k: usize) -> Vec<String> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for community in stats.values() {
        for (label, count) in &community.endings {
            *totals.entry(label.as_str()).or_default() += count;
        }
    }
    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(top_k)
        .map(|(label, _)| label.to_string())
        .collect()
}

/// 커뮤니티 × 語尾 の度数表。上位以外は `(other)` にまとめる。
#[must_use]
pub fn ending_table(stats: &BTreeMap<String, CommunityStats>, top_k: usize) -> ContingencyTable {
    let mut columns = top_endings(stats, top_k);
    let has_other = stats
        .values()
        .any(|c| c.endings.keys().any(|label| !columns.contains(label)));

    let counts = stats
        .values()
        .map(|community| {
            let mut row: Vec<u64> = columns
                .iter()
                .map(|label| community.endings.get(label).copied().unwrap_or(0))
                .collect();
            if has_other {
                let other: u64 = community
                    .endings
                    .iter()
                    .filter(|(label, _)| !columns.contains(*label))
                    .map(|(_, count)| count)
                    .sum();
                row.push(other);
            }
            row
        })
        .collect();
    if has_other {
        columns.push(OTHER_ENDINGS.to_string());
    }
    ContingencyTable::new(stats.keys().cloned().collect(), columns, counts)
}

/// 커뮤니티 × 句読点の有無 の度数表。
#[must_use]
pub fn punctuation_table(stats: &BTreeMap<String, CommunityStats>) -> ContingencyTable {
    ContingencyTable::new(
        stats.keys().cloned().collect(),
        vec!["with_punctuation".into(), "without_punctuation".into()],
        stats
            .values()
            .map(|c| {
                vec![
                    c.sentences_with_punctuation,
                    c.sentences - c.sentences_with_punctuation,
                ]
            })
            .collect(),
    )
}

/// 検定結果の組。検定できない表は `None`。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChiSquareReport {
    pub banmal_only: bool,
    pub top_k: usize,
    pub endings: Option<ChiSquareResult>,
    pub punctuation: Option<ChiSquareResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub communities: BTreeMap<String, CommunityStats>,
    pub chi_square: ChiSquareReport,
    pub files: Vec<PathBuf>,
}

/// すべての `intent_*.csv` を読む。
///
/// # Errors
/// ファイルの読み込みに失敗した場合はエラーを返す。
pub fn load_intent_rows(layout: &DataLayout, filter: Option<&str>) -> Result<Vec<IntentRow>> {
    let mut rows = Vec::new();
    for path in stage_files(&layout.intent_dir(), INTENT_PREFIX, filter)? {
        let loaded: Vec<IntentRow> = read_records(&path)?;
        info!(file = %path.display(), rows = loaded.len(), "loaded intent rows");
        rows.extend(loaded);
    }
    Ok(rows)
}

/// 集計・検定を行い `analysis/` に結果を書き出す。入力がなければ `None`。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。
pub fn run(
    layout: &DataLayout,
    options: &AnalysisOptions,
    filter: Option<&str>,
) -> Result<Option<AnalysisOutput>> {
    let rows = load_intent_rows(layout, filter)?;
    if rows.is_empty() {
        warn!(filter, "no intent rows found; run the intent stage first");
        return Ok(None);
    }

    let communities = aggregate(&rows, options.banmal_only);
    if communities.is_empty() {
        warn!("no sentences left after filtering");
        return Ok(None);
    }

    let top_k = options.top_k.max(1);
    let chi_square = ChiSquareReport {
        banmal_only: options.banmal_only,
        top_k,
        endings: chi_square_test(&ending_table(&communities, top_k)),
        punctuation: chi_square_test(&punctuation_table(&communities)),
    };
    if chi_square.endings.is_none() {
        warn!("ending table needs at least two communities and two endings for a chi-square test");
    }

    let files = report::write_all(&layout.analysis_dir(), &communities, &chi_square)?;
    for community in communities.values() {
        info!(
            community = %community.community,
            sentences = community.sentences,
            casual_ratio = community.casual_ratio(),
            neologisms = ?community.neologisms,
            "community summary"
        );
    }
    Ok(Some(AnalysisOutput {
        communities,
        chi_square,
        files,
    }))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::pipeline::intent::IntentRow;
    use crate::tagger::Morpheme;

    /// テスト用の1文。`endings` は (形態素, タグ) の列で、末尾が `real_ending` になる。
    pub(crate) fn sentence(community: &str, endings: &[(&str, &str)], punctuation: &[&str]) -> IntentRow {
        let morphemes: Vec<Morpheme> = endings
            .iter()
            .map(|&(text, tag)| Morpheme::new(text, tag, 0.99))
            .collect();
        let real = crate::morph::build_real_ending(&morphemes);
        IntentRow {
            community: community.into(),
            full_text: String::new(),
            timestamp: String::new(),
            sentence: "문장".into(),
            real_ending: serde_json::to_string(&real).expect("json"),
            all_endings: serde_json::to_string(&morphemes).expect("json"),
            intent: String::new(),
            punctuation: serde_json::to_string(punctuation).expect("json"),
            symbols: "[]".into(),
        }
    }
}

/// 05: 展開済みの文に分析用の `real_ending` を付ける。
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::StageSummary;
use super::expand::{ExpandedRow, OUTPUT_PREFIX as INPUT_PREFIX};
use crate::config::DataLayout;
use crate::morph::build_real_ending;
use crate::tagger::Morpheme;
use crate::util::dataset::{community_from_path, read_records, stage_files, write_records};

pub const OUTPUT_PREFIX: &str = "intent_";

/// `intent_*.csv` の1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRow {
    pub community: String,
    pub full_text: String,
    #[serde(default)]
    pub timestamp: String,
    pub sentence: String,
    /// 分析に使う末尾の語尾 `[Morpheme]` のJSON
    pub real_ending: String,
    pub all_endings: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub punctuation: String,
    #[serde(default)]
    pub symbols: String,
}

impl IntentRow {
    #[must_use]
    pub fn real_ending_morphemes(&self) -> Vec<Morpheme> {
        parse_list(&self.real_ending)
    }

    #[must_use]
    pub fn all_ending_morphemes(&self) -> Vec<Morpheme> {
        parse_list(&self.all_endings)
    }

    #[must_use]
    pub fn punctuation_marks(&self) -> Vec<String> {
        parse_list(&self.punctuation)
    }

    #[must_use]
    pub fn symbol_marks(&self) -> Vec<String> {
        parse_list(&self.symbols)
    }
}

/// JSON配列の列を読む。空や壊れた値は空リスト。
fn parse_list<T: serde::de::DeserializeOwned>(value: &str) -> Vec<T> {
    let value = value.trim();
    if value.is_empty() {
        return Vec::new();
    }
    serde_json::from_str(value).unwrap_or_default()
}

/// 展開済みの1行から `real_ending` 付きの行を作る。
///
/// # Errors
/// JSONのシリアライズに失敗した場合はエラーを返す。
pub fn intent_row(row: ExpandedRow) -> Result<IntentRow> {
    let endings: Vec<Morpheme> = parse_list(&row.all_endings);
    let real_ending = build_real_ending(&endings);

    Ok(IntentRow {
        community: row.community,
        full_text: row.full_text,
        timestamp: row.timestamp,
        sentence: row.sentence,
        real_ending: serde_json::to_string(&real_ending).context("failed to serialize real_ending")?,
        all_endings: serde_json::to_string(&endings).context("failed to serialize all_endings")?,
        intent: row.intent,
        punctuation: if row.punctuation.trim().is_empty() { "[]".into() } else { row.punctuation },
        symbols: if row.symbols.trim().is_empty() { "[]".into() } else { row.symbols },
    })
}

/// # Errors
/// 入出力に失敗した場合はエラーを返す。
pub fn intent_file(input: &Path, output: &Path) -> Result<(usize, usize)> {
    let rows: Vec<ExpandedRow> = read_records(input)?;
    let total = rows.len();
    let prepared = rows
        .into_iter()
        .map(intent_row)
        .collect::<Result<Vec<_>>>()?;
    write_records(output, &prepared)?;
    Ok((total, prepared.len()))
}

/// `processed/expanded/expanded_*.csv` をすべて処理する。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。
pub fn run(layout: &DataLayout, filter: Option<&str>) -> Result<StageSummary> {
    let mut summary = StageSummary::new("intent");
    let files = stage_files(&layout.expanded_dir(), INPUT_PREFIX, filter)?;
    if files.is_empty() {
        warn!(filter, "no expanded files found; run the expand stage first");
        return Ok(summary);
    }

    for input in files {
        let community = community_from_path(&input, INPUT_PREFIX);
        let output = layout.intent_dir().join(format!("{OUTPUT_PREFIX}{community}.csv"));
        let (rows_in, rows_out) = intent_file(&input, &output)?;
        info!(community = %community, rows = rows_out, file = %output.display(), "intent rows written");
        summary.add_file(rows_in, rows_out);
    }
    Ok(summary)
}

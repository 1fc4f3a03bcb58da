/// 04: `morph_results` を1文1行に展開し、語尾を正規化する。
use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::StageSummary;
use super::morph::{MorphRow, OUTPUT_PREFIX as INPUT_PREFIX};
use crate::config::DataLayout;
use crate::morph::{SentenceResult, normalize_ending};
use crate::tagger::Morpheme;
use crate::util::dataset::{community_from_path, read_records, stage_files, write_records};

pub const OUTPUT_PREFIX: &str = "expanded_";

/// `expanded_*.csv` の1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedRow {
    pub community: String,
    pub full_text: String,
    #[serde(default)]
    pub timestamp: String,
    pub sentence: String,
    /// 正規化済み語尾 `[Morpheme]` のJSON
    pub all_endings: String,
    #[serde(default)]
    pub intent: String,
    pub punctuation: String,
    pub symbols: String,
    pub min_prob: f64,
    pub last_token_prob: f64,
    pub has_oov: bool,
    pub needs_manual_intent: bool,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize column")
}

fn normalized(endings: &[Morpheme]) -> Vec<Morpheme> {
    endings
        .iter()
        .map(|ending| Morpheme {
            text: normalize_ending(&ending.text).to_string(),
            ..ending.clone()
        })
        .collect()
}

fn expanded_row(row: &MorphRow, result: &SentenceResult) -> Result<ExpandedRow> {
    Ok(ExpandedRow {
        community: row.community.clone(),
        full_text: row.full_text.clone(),
        timestamp: row.posted_at.clone(),
        sentence: result.sentence.clone(),
        all_endings: to_json(&normalized(&result.endings))?,
        intent: String::new(),
        punctuation: to_json(&result.punctuation)?,
        symbols: to_json(&result.other_symbols)?,
        min_prob: result.min_prob,
        last_token_prob: result.last_token_prob,
        has_oov: result.has_oov,
        needs_manual_intent: result.needs_manual_intent,
    })
}

/// 1行を文ごとの行に展開する。同じ文は1回だけ出す。
///
/// # Errors
/// `morph_results` が読めない場合はエラーを返す。
pub fn expand_row(row: &MorphRow) -> Result<Vec<ExpandedRow>> {
    let results = row.results()?;
    if results.is_empty() {
        return Ok(vec![expanded_row(row, &SentenceResult::fallback(&row.full_text))?]);
    }

    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|result| seen.insert(result.sentence.as_str()))
        .map(|result| expanded_row(row, result))
        .collect()
}

/// 1ファイル分を展開する。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。壊れた行は警告を出して飛ばす。
pub fn expand_file(input: &Path, output: &Path) -> Result<(usize, usize)> {
    let rows: Vec<MorphRow> = read_records(input)?;
    let mut expanded = Vec::with_capacity(rows.len());
    for row in &rows {
        match expand_row(row) {
            Ok(sentences) => expanded.extend(sentences),
            Err(error) => {
                warn!(id = %row.id, error = %format!("{error:#}"), "skipping row with unreadable results");
            }
        }
    }
    write_records(output, &expanded)?;
    Ok((rows.len(), expanded.len()))
}

/// `processed/morph/morph_*.csv` をすべて展開する。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。
pub fn run(layout: &DataLayout, filter: Option<&str>) -> Result<StageSummary> {
    let mut summary = StageSummary::new("expand");
    let files = stage_files(&layout.morph_dir(), INPUT_PREFIX, filter)?;
    if files.is_empty() {
        warn!(filter, "no morph files found; run the morph stage first");
        return Ok(summary);
    }

    for input in files {
        let community = community_from_path(&input, INPUT_PREFIX);
        let output = layout
            .expanded_dir()
            .join(format!("{OUTPUT_PREFIX}{community}.csv"));
        let (rows_in, rows_out) = expand_file(&input, &output)?;
        info!(community = %community, rows_in, rows_out, "sentences expanded");
        summary.add_file(rows_in, rows_out);
    }
    Ok(summary)
}

//! 形態素処理結果の手動レビュー（CSVへの書き出しと修正の取り込み）。
//!
//! 書き出したCSVの `sentences_text` 列を表計算ソフトで編集（文の分割・結合・修正）し、
//! `review_dataset_corrected.csv` として保存したものを取り込むと、変更された行だけを再解析する。

pub mod export;
pub mod import;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::morph::MorphRow;
use crate::util::dataset::read_records;

pub use export::{ExportSummary, export_for_review};
pub use import::{ImportSummary, import_corrections};

pub const REVIEW_FILE: &str = "review_dataset.csv";
pub const CORRECTED_FILE: &str = "review_dataset_corrected.csv";

/// レビュー用CSVの1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRow {
    pub id: String,
    pub community: String,
    #[serde(default)]
    pub posted_at: String,
    pub full_text: String,
    /// 1行1文。編集対象の列
    #[serde(default)]
    pub sentences_text: String,
    pub needs_manual_intent: bool,
    pub has_oov: bool,
    pub min_prob: f64,
}

/// 形態素処理ファイルとその全行。
#[derive(Debug, Clone)]
pub(crate) struct MorphFile {
    pub(crate) path: std::path::PathBuf,
    pub(crate) rows: Vec<MorphRow>,
}

pub(crate) fn load_morph_file(path: &Path) -> Result<MorphFile> {
    Ok(MorphFile {
        path: path.to_path_buf(),
        rows: read_records(path)?,
    })
}

/// 行の文を改行でつなぐ。結果が読めなければ空文字列。
pub(crate) fn sentences_text(row: &MorphRow) -> String {
    match row.results() {
        Ok(results) => results
            .iter()
            .map(|result| result.sentence.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        Err(error) => {
            warn!(id = %row.id, error = %format!("{error:#}"), "unreadable morph_results");
            String::new()
        }
    }
}

/// 改行コードを揃えて前後の空白を除く。
pub(crate) fn normalize_sentences_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

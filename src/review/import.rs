/// 修正済みレビューCSVの取り込み。変更された行だけを再タグ付けして `morph_results` を置き換える。
use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use super::{CORRECTED_FILE, MorphFile, load_morph_file, normalize_sentences_text, sentences_text};
use crate::config::DataLayout;
use crate::morph::{ManualCheck, SentenceResult};
use crate::pipeline::morph::OUTPUT_PREFIX as MORPH_PREFIX;
use crate::tagger::MorphTagger;
use crate::util::dataset::{read_records, stage_files, write_records};
use crate::util::error::is_fatal;
use crate::util::progress::progress_bar;

/// 修正ファイルから読む列。
#[derive(Debug, Clone, Deserialize)]
struct Correction {
    id: String,
    #[serde(default)]
    sentences_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub updated: usize,
    pub saved_files: Vec<PathBuf>,
}

/// 修正後の各文をタグ付けし直して結果を作る。
///
/// # Errors
/// 認証エラーなど致命的なタグ付けエラーのときだけ返す。その他の失敗は確率0の結果になる。
pub async fn reanalyze(tagger: &dyn MorphTagger, text: &str) -> Result<Vec<SentenceResult>> {
    let mut results = Vec::new();
    for sentence in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match tagger.analyze(sentence).await {
            Ok(tokens) => {
                results.push(SentenceResult::analyze(sentence, &tokens, ManualCheck::Corrected));
            }
            Err(error) if is_fatal(&error) => return Err(error),
            Err(error) => {
                warn!(sentence, error = %format!("{error:#}"), "re-tagging failed");
                results.push(SentenceResult::failed(sentence));
            }
        }
    }
    Ok(results)
}

/// `review/review_dataset_corrected.csv` の変更を `morph_*.csv` に反映する。
///
/// # Errors
/// 修正ファイルが読めない場合、書き込みに失敗した場合、致命的なタグ付けエラーの場合に返す。
pub async fn import_corrections(layout: &DataLayout, tagger: &dyn MorphTagger) -> Result<ImportSummary> {
    let corrected_path = layout.review_dir().join(CORRECTED_FILE);
    if !corrected_path.exists() {
        anyhow::bail!(
            "corrected review file not found: {} (save your edits under this name)",
            corrected_path.display()
        );
    }

    let mut files: Vec<MorphFile> = stage_files(&layout.morph_dir(), MORPH_PREFIX, None)?
        .iter()
        .map(|path| load_morph_file(path))
        .collect::<Result<_>>()?;
    let mut index: HashMap<String, (usize, usize)> = HashMap::new();
    for (file_idx, file) in files.iter().enumerate() {
        for (row_idx, row) in file.rows.iter().enumerate() {
            if !row.id.is_empty() {
                index.insert(row.id.clone(), (file_idx, row_idx));
            }
        }
    }
    info!(rows = index.len(), files = files.len(), "loaded morph rows");

    let corrections: Vec<Correction> = read_records(&corrected_path)
        .with_context(|| format!("failed to read {}", corrected_path.display()))?;
    let progress = progress_bar(corrections.len(), "import corrections");

    let mut updated = 0;
    let mut dirty = vec![false; files.len()];
    for correction in corrections {
        progress.inc(1);
        let Some(&(file_idx, row_idx)) = index.get(&correction.id) else {
            continue;
        };
        let row = &files[file_idx].rows[row_idx];
        let edited = normalize_sentences_text(correction.sentences_text.as_deref().unwrap_or_default());
        if edited == normalize_sentences_text(&sentences_text(row)) {
            continue;
        }

        let results = reanalyze(tagger, &edited).await?;
        files[file_idx].rows[row_idx].set_results(&results)?;
        dirty[file_idx] = true;
        updated += 1;
    }
    progress.finish_and_clear();

    let mut saved_files = Vec::new();
    for (file, _) in files.iter().zip(&dirty).filter(|(_, dirty)| **dirty) {
        write_records(&file.path, &file.rows)?;
        saved_files.push(file.path.clone());
    }

    info!(updated, files = saved_files.len(), "corrections imported");
    Ok(ImportSummary { updated, saved_files })
}

/// レビュー用CSVの書き出し。
use std::path::PathBuf;

use anyhow::Result;
use tracing::info;
use uuid::Uuid;

use super::{MorphFile, REVIEW_FILE, ReviewRow, load_morph_file, sentences_text};
use crate::config::DataLayout;
use crate::pipeline::morph::{MorphRow, OUTPUT_PREFIX as MORPH_PREFIX};
use crate::util::dataset::{stage_files, write_records};

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub needs_manual: usize,
    /// IDを補って書き直したファイル
    pub rewritten: Vec<PathBuf>,
}

/// IDのない行にUUIDを振る。振った行があれば `true`。
fn assign_missing_ids(file: &mut MorphFile) -> bool {
    let mut changed = false;
    for row in file.rows.iter_mut().filter(|row| row.id.trim().is_empty()) {
        row.id = Uuid::new_v4().to_string();
        changed = true;
    }
    changed
}

fn review_row(row: &MorphRow) -> ReviewRow {
    let results = row.results().unwrap_or_default();
    ReviewRow {
        id: row.id.clone(),
        community: row.community.clone(),
        posted_at: row.posted_at.clone(),
        full_text: row.full_text.clone(),
        sentences_text: sentences_text(row),
        needs_manual_intent: results.iter().any(|r| r.needs_manual_intent),
        has_oov: results.iter().any(|r| r.has_oov),
        min_prob: results.iter().map(|r| r.min_prob).fold(1.0, f64::min),
    }
}

/// 要確認の行を先に、その中では最小確率の低い順に並べる。
fn sort_for_review(rows: &mut [ReviewRow]) {
    rows.sort_by(|a, b| {
        b.needs_manual_intent
            .cmp(&a.needs_manual_intent)
            .then(a.min_prob.total_cmp(&b.min_prob))
    });
}

/// すべての `morph_*.csv` から `review/review_dataset.csv` を作る。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。
pub fn export_for_review(layout: &DataLayout) -> Result<Option<ExportSummary>> {
    let files = stage_files(&layout.morph_dir(), MORPH_PREFIX, None)?;
    if files.is_empty() {
        return Ok(None);
    }

    let mut review_rows = Vec::new();
    let mut rewritten = Vec::new();
    for path in &files {
        let mut file = load_morph_file(path)?;
        if assign_missing_ids(&mut file) {
            info!(file = %path.display(), "assigned missing row ids");
            write_records(&file.path, &file.rows)?;
            rewritten.push(file.path.clone());
        }
        review_rows.extend(file.rows.iter().map(review_row));
    }

    sort_for_review(&mut review_rows);
    let path = layout.review_dir().join(REVIEW_FILE);
    write_records(&path, &review_rows)?;

    let needs_manual = review_rows.iter().filter(|r| r.needs_manual_intent).count();
    info!(path = %path.display(), rows = review_rows.len(), needs_manual, "review dataset exported");
    Ok(Some(ExportSummary {
        path,
        rows: review_rows.len(),
        needs_manual,
        rewritten,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::SentenceResult;
    use crate::util::dataset::read_records;

    fn morph_row(id: &str, results: &[SentenceResult]) -> MorphRow {
        let mut row = MorphRow {
            community: "theqoo_beauty".into(),
            title: String::new(),
            content: format!("본문 {id}"),
            full_text: format!("전문 {id}"),
            posted_at: String::new(),
            sentence_segments: String::new(),
            row_index: None,
            id: id.into(),
            morph_results: String::new(),
        };
        row.set_results(results).expect("results");
        row
    }

    fn result(sentence: &str, min_prob: f64, manual: bool) -> SentenceResult {
        SentenceResult {
            min_prob,
            needs_manual_intent: manual,
            ..SentenceResult::fallback(sentence)
        }
    }

    #[test]
    fn export_sorts_and_backfills_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = DataLayout::new(dir.path());
        let morph_path = layout.morph_dir().join("morph_theqoo_beauty.csv");
        write_records(
            &morph_path,
            &[
                morph_row("a", &[result("괜찮다", 0.99, false)]),
                morph_row("", &[result("첫 문장", 0.9, true), result("둘째", 0.4, false)]),
                morph_row("c", &[result("애매", 0.8, true)]),
            ],
        )
        .expect("write");

        let summary = export_for_review(&layout).expect("export").expect("files exist");
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.needs_manual, 2);
        assert_eq!(summary.rewritten, vec![morph_path.clone()]);

        let rows: Vec<ReviewRow> = read_records(&summary.path).expect("read");
        assert_eq!(rows[0].sentences_text, "첫 문장\n둘째");
        assert!((rows[0].min_prob - 0.4).abs() < f64::EPSILON);
        assert_eq!(rows[1].id, "c");
        assert_eq!(rows[2].id, "a");
        assert!(!rows[0].id.is_empty());

        let saved: Vec<MorphRow> = read_records(&morph_path).expect("morph");
        assert_eq!(saved[1].id, rows[0].id);
    }

    #[test]
    fn export_without_morph_files_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(export_for_review(&DataLayout::new(dir.path())).expect("export").is_none());
    }
}

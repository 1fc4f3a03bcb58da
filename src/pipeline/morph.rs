/// 03: タグ付け結果を終結語尾で分割し、語尾・記号・確率をまとめた `morph_results` を作る。
///
/// 長い対話レビューに備えて、処理済みの行は `MORPH_SAVE_INTERVAL` 行ごとに
/// `morph_{community}.partial.csv` へ追記し、再実行時は記録済みの最大 `row_index` の次から再開する。
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::StageSummary;
use super::tag::{OUTPUT_PREFIX as INPUT_PREFIX, TaggedRow};
use crate::config::{Config, DataLayout};
use crate::morph::{ManualCheck, Reviewer, SegmentOutcome, SentenceResult, segment_sentence_by_endings};
use crate::util::dataset::{append_records, community_from_path, read_records, stage_files};
use crate::util::progress::progress_bar;

pub const OUTPUT_PREFIX: &str = "morph_";
const PARTIAL_SUFFIX: &str = ".partial.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorphOptions {
    /// 途中結果を追記する間隔（行数）
    pub save_interval: usize,
}

impl Default for MorphOptions {
    fn default() -> Self {
        Self { save_interval: 100 }
    }
}

impl MorphOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            save_interval: config.morph_save_interval().get(),
        }
    }
}

/// `morph_*.csv` の1行。タグ付け結果の列に `row_index`、`id`、`morph_results` を加えたもの。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphRow {
    pub community: String,
    pub title: String,
    pub content: String,
    pub full_text: String,
    #[serde(default)]
    pub posted_at: String,
    #[serde(default)]
    pub sentence_segments: String,
    #[serde(default)]
    pub row_index: Option<usize>,
    #[serde(default)]
    pub id: String,
    /// `[SentenceResult]` のJSON
    pub morph_results: String,
}

impl MorphRow {
    /// `morph_results` 列を読む。
    ///
    /// # Errors
    /// JSONとして読めない場合はエラーを返す。
    pub fn results(&self) -> Result<Vec<SentenceResult>> {
        if self.morph_results.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.morph_results).context("invalid morph_results JSON")
    }

    /// `morph_results` 列を書き換える。
    ///
    /// # Errors
    /// シリアライズに失敗した場合はエラーを返す。
    pub fn set_results(&mut self, results: &[SentenceResult]) -> Result<()> {
        self.morph_results =
            serde_json::to_string(results).context("failed to serialize morph results")?;
        Ok(())
    }
}

/// 1行の分析結果。
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Results(Vec<SentenceResult>),
    /// レビュアーが削除を選んだ
    Deleted,
}

/// 1行分の文セグメントを分割・分析する。結果が1件もなければ全文の代替結果を1件入れる。
pub fn analyze_row(row: &TaggedRow, mut reviewer: Option<&mut (dyn Reviewer + '_)>) -> RowOutcome {
    let mut results = Vec::new();

    for segment in row.segments() {
        match segment_sentence_by_endings(&segment.sentence, &segment.tokens, reviewer.as_deref_mut()) {
            SegmentOutcome::Segments(pieces) => {
                results.extend(
                    pieces
                        .iter()
                        .map(|piece| SentenceResult::analyze(&piece.text, &piece.tokens, ManualCheck::Strict)),
                );
            }
            SegmentOutcome::Deleted => return RowOutcome::Deleted,
        }
    }

    if results.is_empty() {
        results.push(SentenceResult::fallback(&row.full_text));
    }
    RowOutcome::Results(results)
}

/// 本文が同じ行は最初の1件だけ残す。
#[must_use]
pub fn dedup_by_content(rows: Vec<TaggedRow>) -> Vec<TaggedRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.content.clone()))
        .collect()
}

/// 最終ファイルに対応する途中結果ファイルのパス。
#[must_use]
pub fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    output.with_file_name(format!("{stem}{PARTIAL_SUFFIX}"))
}

/// 途中結果に記録された最大の `row_index`。読めなければ途中結果を捨てて最初からやり直す。
fn resume_point(partial: &Path) -> Result<Option<usize>> {
    if !partial.exists() {
        return Ok(None);
    }
    match read_records::<MorphRow>(partial) {
        Ok(rows) => Ok(rows.iter().filter_map(|row| row.row_index).max()),
        Err(error) => {
            warn!(file = %partial.display(), error = %format!("{error:#}"), "unreadable partial file; starting over");
            fs::remove_file(partial)
                .with_context(|| format!("failed to remove {}", partial.display()))?;
            Ok(None)
        }
    }
}

fn promote(partial: &Path, output: &Path) -> Result<()> {
    fs::rename(partial, output).with_context(|| {
        format!("failed to move {} to {}", partial.display(), output.display())
    })
}

fn build_row(row: TaggedRow, row_index: usize, results: &[SentenceResult]) -> Result<MorphRow> {
    let mut morph_row = MorphRow {
        community: row.community,
        title: row.title,
        content: row.content,
        full_text: row.full_text,
        posted_at: row.posted_at,
        sentence_segments: row.sentence_segments,
        row_index: Some(row_index),
        id: Uuid::new_v4().to_string(),
        morph_results: String::new(),
    };
    morph_row.set_results(results)?;
    Ok(morph_row)
}

/// 1ファイル分を処理する。戻り値は（重複除去後の入力行数, 今回書き出した行数）。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。
pub fn process_file(
    input: &Path,
    output: &Path,
    options: &MorphOptions,
    mut reviewer: Option<&mut (dyn Reviewer + '_)>,
) -> Result<(usize, usize)> {
    let rows: Vec<TaggedRow> = read_records(input)?;
    let before = rows.len();
    let rows = dedup_by_content(rows);
    if rows.len() < before {
        info!(file = %input.display(), removed = before - rows.len(), "dropped duplicate content rows");
    }
    let total = rows.len();

    let partial = partial_path(output);
    let start = match resume_point(&partial)? {
        Some(last) if last + 1 >= total => {
            info!(file = %partial.display(), "all rows already processed; promoting partial file");
            promote(&partial, output)?;
            return Ok((total, 0));
        }
        Some(last) => {
            info!(file = %partial.display(), resume_from = last + 1, "resuming from partial file");
            last + 1
        }
        None => 0,
    };

    let interval = options.save_interval.max(1);
    let progress = progress_bar(total - start, &format!("morph {}", community_from_path(input, INPUT_PREFIX)));
    let mut buffer: Vec<MorphRow> = Vec::with_capacity(interval);
    let mut written = 0;

    for (row_index, row) in rows.into_iter().enumerate().skip(start) {
        progress.inc(1);
        let results = match analyze_row(&row, reviewer.as_deref_mut()) {
            RowOutcome::Results(results) => results,
            RowOutcome::Deleted => {
                debug!(row_index, "row deleted by reviewer");
                continue;
            }
        };
        buffer.push(build_row(row, row_index, &results)?);

        if buffer.len() >= interval {
            append_records(&partial, &buffer)?;
            written += buffer.len();
            buffer.clear();
        }
    }
    progress.finish_and_clear();

    if !buffer.is_empty() {
        append_records(&partial, &buffer)?;
        written += buffer.len();
    }

    if partial.exists() {
        promote(&partial, output)?;
    } else {
        warn!(file = %input.display(), "no rows to save");
    }
    Ok((total, written))
}

/// `processed/tagged/tagged_*.csv` をすべて処理する。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。
pub fn run(
    layout: &DataLayout,
    options: &MorphOptions,
    mut reviewer: Option<&mut (dyn Reviewer + '_)>,
    filter: Option<&str>,
) -> Result<StageSummary> {
    let mut summary = StageSummary::new("morph");
    let files = stage_files(&layout.tagged_dir(), INPUT_PREFIX, filter)?;
    if files.is_empty() {
        warn!(filter, "no tagged files found; run the tag stage first");
        return Ok(summary);
    }

    for input in files {
        let community = community_from_path(&input, INPUT_PREFIX);
        let output = layout.morph_dir().join(format!("{OUTPUT_PREFIX}{community}.csv"));
        let (rows_in, rows_out) = process_file(&input, &output, options, reviewer.as_deref_mut())
            .with_context(|| format!("morph processing of {} failed", input.display()))?;
        info!(community = %community, rows = rows_out, file = %output.display(), "morph rows written");
        summary.add_file(rows_in, rows_out);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::Decision;
    use crate::pipeline::tag::SentenceSegment;
    use crate::tagger::Morpheme;
    use crate::util::dataset::write_records;

    fn tagged(content: &str, segments: &[SentenceSegment]) -> TaggedRow {
        TaggedRow {
            community: "dcinside_test".into(),
            title: String::new(),
            content: content.into(),
            full_text: content.into(),
            posted_at: "2024-05-01T10:00:00".into(),
            sentence_segments: serde_json::to_string(segments).expect("json"),
        }
    }

    fn greeting() -> SentenceSegment {
        SentenceSegment {
            sentence: "밥 먹었어? 응".into(),
            tokens: vec![
                Morpheme::new("밥", "NNG", 0.99),
                Morpheme::new("먹", "VV", 0.99),
                Morpheme::new("었", "EP", 0.99),
                Morpheme::new("어", "EF", 0.97),
                Morpheme::new("?", "SF", 0.99),
                Morpheme::new("응", "IC", 0.8),
            ],
        }
    }

    struct AlwaysDelete;

    impl Reviewer for AlwaysDelete {
        fn review(&mut self, _: &[Morpheme], _: usize, _: &str) -> Decision {
            Decision::Delete
        }
    }

    #[test]
    fn analyze_row_splits_on_final_endings() {
        let RowOutcome::Results(results) = analyze_row(&tagged("밥 먹었어? 응", &[greeting()]), None) else {
            panic!("row should not be deleted");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].sentence, "밥 먹었어?");
        assert_eq!(results[0].ending_morphs(), ["어"]);
        assert_eq!(results[0].punctuation, ["?"]);
        assert!(!results[0].needs_manual_intent);
        assert_eq!(results[1].sentence, "응");
        assert!(results[1].needs_manual_intent);
    }

    #[test]
    fn rows_without_segments_get_fallback_result() {
        let RowOutcome::Results(results) = analyze_row(&tagged("내용", &[]), None) else {
            panic!("row should not be deleted");
        };
        assert_eq!(results, vec![SentenceResult::fallback("내용")]);
    }

    #[test]
    fn reviewer_delete_drops_row() {
        let segment = SentenceSegment {
            sentence: "이거 임".into(),
            tokens: vec![
                Morpheme::new("이거", "NP", 0.99),
                Morpheme::new("임", "NNG", 0.99),
            ],
        };
        let mut reviewer = AlwaysDelete;
        let outcome = analyze_row(&tagged("이거 임", &[segment]), Some(&mut reviewer));
        assert_eq!(outcome, RowOutcome::Deleted);
    }

    #[test]
    fn dedup_keeps_first_content() {
        let rows = vec![tagged("같은 글", &[]), tagged("다른 글", &[]), tagged("같은 글", &[])];
        let unique = dedup_by_content(rows);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[1].content, "다른 글");
    }

    #[test]
    fn dedup_keeps_contents_that_differ_slightly() {
        let rows = vec![tagged("같은 글", &[]), tagged("같은 글.", &[]), tagged("같은  글", &[])];
        assert_eq!(dedup_by_content(rows).len(), 3);
    }

    #[test]
    fn partial_path_sits_next_to_output() {
        let path = partial_path(Path::new("/data/processed/morph/morph_a.csv"));
        assert_eq!(path, Path::new("/data/processed/morph/morph_a.partial.csv"));
    }

    #[test]
    fn process_file_checkpoints_and_resumes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("tagged_x.csv");
        let output = dir.path().join("morph/morph_x.csv");
        let rows: Vec<TaggedRow> = (0..5)
            .map(|i| tagged(&format!("글 {i}"), &[greeting()]))
            .collect();
        write_records(&input, &rows).expect("write input");

        // 2行目まで処理済みの途中結果を用意する
        let partial = partial_path(&output);
        let done: Vec<MorphRow> = rows[..2]
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, row)| build_row(row, i, &[SentenceResult::fallback("x")]).expect("row"))
            .collect();
        append_records(&partial, &done).expect("partial");

        let options = MorphOptions { save_interval: 2 };
        let (total, written) = process_file(&input, &output, &options, None).expect("process");
        assert_eq!((total, written), (5, 3));
        assert!(!partial.exists());

        let saved: Vec<MorphRow> = read_records(&output).expect("read output");
        let indices: Vec<Option<usize>> = saved.iter().map(|r| r.row_index).collect();
        assert_eq!(indices, [Some(0), Some(1), Some(2), Some(3), Some(4)]);
        assert!(saved.iter().all(|r| Uuid::parse_str(&r.id).is_ok()));
        assert_eq!(saved[2].results().expect("results").len(), 2);
    }

    #[test]
    fn complete_partial_is_promoted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("tagged_x.csv");
        let output = dir.path().join("morph_x.csv");
        let rows = vec![tagged("하나", &[])];
        write_records(&input, &rows).expect("write input");
        let partial = partial_path(&output);
        append_records(
            &partial,
            &[build_row(rows[0].clone(), 0, &[SentenceResult::fallback("하나")]).expect("row")],
        )
        .expect("partial");

        let (total, written) =
            process_file(&input, &output, &MorphOptions::default(), None).expect("process");
        assert_eq!((total, written), (1, 0));
        assert!(output.exists());
        assert!(!partial.exists());
    }
}

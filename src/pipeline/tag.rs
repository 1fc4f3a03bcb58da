/// 02: 精製済みテキストを文に分割し、形態素解析器でタグ付けする。
use std::path::Path;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::StageSummary;
use super::clean::{CleanedRow, OUTPUT_PREFIX as INPUT_PREFIX};
use crate::config::DataLayout;
use crate::tagger::{MorphTagger, Morpheme};
use crate::util::dataset::{community_from_path, read_records, stage_files, write_records};
use crate::util::error::is_fatal;
use crate::util::progress::progress_bar;
use crate::util::text::split_sentences;

pub const OUTPUT_PREFIX: &str = "tagged_";

/// 1文とその形態素列。`sentence_segments` 列の要素。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceSegment {
    pub sentence: String,
    #[serde(default)]
    pub tokens: Vec<Morpheme>,
}

/// `tagged_*.csv` の1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedRow {
    pub community: String,
    pub title: String,
    pub content: String,
    pub full_text: String,
    #[serde(default)]
    pub posted_at: String,
    /// `[SentenceSegment]` のJSON
    pub sentence_segments: String,
}

impl TaggedRow {
    /// `sentence_segments` 列を読む。壊れたJSONは空として扱う。
    #[must_use]
    pub fn segments(&self) -> Vec<SentenceSegment> {
        if self.sentence_segments.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(&self.sentence_segments).unwrap_or_else(|error| {
            warn!(error = %error, "invalid sentence_segments JSON; treating as empty");
            Vec::new()
        })
    }
}

async fn tag_sentence(tagger: &dyn MorphTagger, sentence: String) -> Result<SentenceSegment> {
    let tokens = match tagger.analyze(&sentence).await {
        Ok(tokens) => tokens,
        Err(error) if is_fatal(&error) => return Err(error),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "tagging failed; keeping sentence without tokens");
            Vec::new()
        }
    };
    Ok(SentenceSegment { sentence, tokens })
}

/// 全文を文に分割してタグ付けする。文が取れなければ全文を1文として扱う。
///
/// # Errors
/// 認証エラーなど致命的な失敗だけをエラーとして返す。
pub async fn tag_text(tagger: &dyn MorphTagger, full_text: &str) -> Result<Vec<SentenceSegment>> {
    let mut sentences = split_sentences(full_text);
    if sentences.is_empty() && !full_text.is_empty() {
        sentences.push(full_text.to_string());
    }

    let mut segments = Vec::with_capacity(sentences.len());
    for sentence in sentences {
        segments.push(tag_sentence(tagger, sentence).await?);
    }
    Ok(segments)
}

async fn tag_row(tagger: &dyn MorphTagger, row: CleanedRow) -> Result<TaggedRow> {
    let segments = tag_text(tagger, &row.full_text).await?;
    let sentence_segments =
        serde_json::to_string(&segments).context("failed to serialize sentence segments")?;
    Ok(TaggedRow {
        community: row.community,
        title: row.title,
        content: row.content,
        full_text: row.full_text,
        posted_at: row.posted_at,
        sentence_segments,
    })
}

/// 1ファイル分をタグ付けする。最大 `concurrency` 行を並行に処理し、出力順は入力順を保つ。
///
/// # Errors
/// 入出力の失敗、または致命的なタグ付けエラーで返る。
pub async fn tag_file(
    tagger: &dyn MorphTagger,
    input: &Path,
    output: &Path,
    concurrency: usize,
) -> Result<(usize, usize)> {
    let rows: Vec<CleanedRow> = read_records(input)?;
    let total = rows.len();
    let progress = progress_bar(total, &format!("tag {}", community_from_path(input, INPUT_PREFIX)));

    let tagged: Vec<TaggedRow> = stream::iter(rows)
        .map(|row| {
            let progress = progress.clone();
            async move {
                let tagged = tag_row(tagger, row).await;
                progress.inc(1);
                tagged
            }
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;
    progress.finish_and_clear();

    write_records(output, &tagged)?;
    Ok((total, tagged.len()))
}

/// `preprocessed/cleaned_*.csv` をすべてタグ付けする。
///
/// # Errors
/// 入出力の失敗、または致命的なタグ付けエラーで返る。
pub async fn run(
    layout: &DataLayout,
    tagger: &dyn MorphTagger,
    concurrency: usize,
    filter: Option<&str>,
) -> Result<StageSummary> {
    let mut summary = StageSummary::new("tag");
    let files = stage_files(&layout.preprocessed_dir(), INPUT_PREFIX, filter)?;
    if files.is_empty() {
        warn!(filter, "no cleaned files to tag; run the clean stage first");
        return Ok(summary);
    }

    for input in files {
        let community = community_from_path(&input, INPUT_PREFIX);
        let output = layout
            .tagged_dir()
            .join(format!("{OUTPUT_PREFIX}{community}.csv"));
        let (rows_in, rows_out) = tag_file(tagger, &input, &output, concurrency)
            .await
            .with_context(|| format!("tagging {} failed", input.display()))?;
        info!(community = %community, rows = rows_out, file = %output.display(), "tagged rows written");
        summary.add_file(rows_in, rows_out);
    }
    Ok(summary)
}

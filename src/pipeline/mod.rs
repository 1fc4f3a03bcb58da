//! コミュニティ単位のCSVを段階的に加工する前処理パイプライン。
//!
//! clean → tag → morph → expand → intent の順に、各ステージが前段の出力ディレクトリを読み、
//! 自分の出力ディレクトリへ `{prefix}_{community}.csv` を書く。

pub mod clean;
pub mod expand;
pub mod intent;
pub mod morph;
pub mod tag;

use std::fmt;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::tagger::MorphTagger;

/// 1ステージの処理件数。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: &'static str,
    pub files: usize,
    pub rows_in: usize,
    pub rows_out: usize,
}

impl StageSummary {
    #[must_use]
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    pub(crate) fn add_file(&mut self, rows_in: usize, rows_out: usize) {
        self.files += 1;
        self.rows_in += rows_in;
        self.rows_out += rows_out;
    }
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} file(s), {} -> {} rows",
            self.stage, self.files, self.rows_in, self.rows_out
        )
    }
}

/// clean から intent までを順に実行する（morph は非対話）。
///
/// # Errors
/// いずれかのステージが失敗した時点でエラーを返す。
pub async fn run_pipeline(
    config: &Config,
    tagger: &dyn MorphTagger,
    filter: Option<&str>,
) -> Result<Vec<StageSummary>> {
    let layout = config.layout();
    let mut summaries = Vec::with_capacity(5);

    summaries.push(clean::run(&layout, filter)?);
    summaries.push(tag::run(&layout, tagger, config.tag_max_concurrency().get(), filter).await?);
    summaries.push(morph::run(&layout, &morph::MorphOptions::from_config(config), None, filter)?);
    summaries.push(expand::run(&layout, filter)?);
    summaries.push(intent::run(&layout, filter)?);

    for summary in &summaries {
        info!(
            stage = summary.stage,
            files = summary.files,
            rows_in = summary.rows_in,
            rows_out = summary.rows_out,
            "stage finished"
        );
    }
    Ok(summaries)
}

/// 集計結果のファイル出力。
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::chart::{BarSeries, grouped_bar_chart};
use super::{ChiSquareReport, CommunityStats, top_endings};
use crate::util::dataset::write_records;

pub const ENDING_FREQUENCIES_FILE: &str = "ending_frequencies.csv";
pub const PUNCTUATION_FREQUENCIES_FILE: &str = "punctuation_frequencies.csv";
pub const CHI_SQUARE_FILE: &str = "chi_square.json";
pub const ENDING_CHART_FILE: &str = "ending_frequencies.svg";

/// 커뮤니티内の語尾の出現数と割合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndingFrequencyRow {
    pub community: String,
    pub ending: String,
    pub count: u64,
    pub ratio: f64,
}

/// 記号の出現数。`kind` は `punctuation` または `symbol`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkFrequencyRow {
    pub community: String,
    pub kind: String,
    pub mark: String,
    pub count: u64,
    /// 커뮤니티の文数に対する割合
    pub ratio: f64,
}

/// 커뮤니티ごとに出現数の多い順。
#[must_use]
pub fn ending_rows(stats: &BTreeMap<String, CommunityStats>) -> Vec<EndingFrequencyRow> {
    let mut rows = Vec::new();
    for community in stats.values() {
        let mut endings: Vec<(&String, &u64)> = community.endings.iter().collect();
        endings.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        rows.extend(endings.into_iter().map(|(ending, &count)| EndingFrequencyRow {
            community: community.community.clone(),
            ending: ending.clone(),
            count,
            ratio: community.ratio(count),
        }));
    }
    rows
}

#[must_use]
pub fn mark_rows(stats: &BTreeMap<String, CommunityStats>) -> Vec<MarkFrequencyRow> {
    let mut rows = Vec::new();
    for community in stats.values() {
        for (kind, marks) in [("punctuation", &community.punctuation), ("symbol", &community.symbols)] {
            let mut marks: Vec<(&String, &u64)> = marks.iter().collect();
            marks.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            rows.extend(marks.into_iter().map(|(mark, &count)| MarkFrequencyRow {
                community: community.community.clone(),
                kind: kind.to_string(),
                mark: mark.clone(),
                count,
                ratio: community.ratio(count),
            }));
        }
    }
    rows
}

/// 上位語尾の割合を커뮤니티ごとの系列にする。
fn chart_series(stats: &BTreeMap<String, CommunityStats>, labels: &[String]) -> Vec<BarSeries> {
    stats
        .values()
        .map(|community| BarSeries {
            name: community.community.clone(),
            values: labels
                .iter()
                .map(|label| community.ratio(community.endings.get(label).copied().unwrap_or(0)))
                .collect(),
        })
        .collect()
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// 4つの出力ファイルを書き、そのパスを返す。
///
/// # Errors
/// 書き込みに失敗した場合はエラーを返す。
pub fn write_all(
    dir: &Path,
    stats: &BTreeMap<String, CommunityStats>,
    chi_square: &ChiSquareReport,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let endings_path = dir.join(ENDING_FREQUENCIES_FILE);
    write_records(&endings_path, &ending_rows(stats))?;

    let marks_path = dir.join(PUNCTUATION_FREQUENCIES_FILE);
    write_records(&marks_path, &mark_rows(stats))?;

    let chi_path = dir.join(CHI_SQUARE_FILE);
    let json = serde_json::to_string_pretty(chi_square).context("failed to serialize chi-square report")?;
    write_text(&chi_path, &json)?;

    let labels = top_endings(stats, chi_square.top_k);
    let chart_path = dir.join(ENDING_CHART_FILE);
    let svg = grouped_bar_chart("Ending ratio by community", &labels, &chart_series(stats, &labels));
    write_text(&chart_path, &svg)?;

    info!(dir = %dir.display(), "analysis outputs written");
    Ok(vec![endings_path, marks_path, chi_path, chart_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::sentence;
    use crate::analysis::{aggregate, chi_square_test, ending_table, punctuation_table};
    use crate::util::dataset::read_records;

    #[test]
    fn frequency_rows_are_sorted_by_count() {
        let stats = aggregate(
            &[
                sentence("a", &[("지", "EF")], &["?"]),
                sentence("a", &[("다", "EF")], &["?", "!"]),
                sentence("a", &[("다", "EF")], &[]),
            ],
            false,
        );
        let endings = ending_rows(&stats);
        assert_eq!(endings[0].ending, "다");
        assert_eq!(endings[0].count, 2);
        assert!((endings[0].ratio - 2.0 / 3.0).abs() < 1e-12);

        let marks = mark_rows(&stats);
        assert_eq!(marks[0].mark, "?");
        assert_eq!(marks[0].count, 2);
        assert_eq!(marks[1].mark, "!");
    }

    #[test]
    fn write_all_produces_readable_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stats = aggregate(
            &[
                sentence("a", &[("다", "EF")], &["?"]),
                sentence("a", &[("지", "EF")], &[]),
                sentence("b", &[("다", "EF")], &[]),
                sentence("b", &[("냐", "EF")], &["!"]),
            ],
            false,
        );
        let report = ChiSquareReport {
            banmal_only: false,
            top_k: 10,
            endings: chi_square_test(&ending_table(&stats, 10)),
            punctuation: chi_square_test(&punctuation_table(&stats)),
        };
        let files = write_all(dir.path(), &stats, &report).expect("write");
        assert_eq!(files.len(), 4);

        let rows: Vec<EndingFrequencyRow> = read_records(&files[0]).expect("endings csv");
        assert_eq!(rows.len(), 4);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&files[2]).expect("json")).expect("parse");
        assert_eq!(json["endings"]["dof"], 2);
        assert_eq!(json["punctuation"]["dof"], 1);

        let svg = fs::read_to_string(&files[3]).expect("svg");
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(">a<") && svg.contains(">b<"));
    }
}

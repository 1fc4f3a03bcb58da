/// 01: クロール結果の正規化・英字除去・重複除去。
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use super::StageSummary;
use crate::config::DataLayout;
use crate::util::dataset::{read_headers, read_records, stage_files, write_records};

pub const OUTPUT_PREFIX: &str = "cleaned_";

static APP_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)-\s*dc\s+official\s+App").expect("valid app signature pattern")
});
static LATIN_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z]+").expect("valid latin pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static UNSAFE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-_]").expect("valid file name pattern"));

/// `raw/` のCSVから読む列。他の列は無視する。
#[derive(Debug, Clone, Default, Deserialize)]
struct RawRow {
    #[serde(default)]
    site: Option<String>,
    #[serde(default)]
    gallery: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    posted_at: Option<String>,
}

/// `cleaned_*.csv` の1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRow {
    pub community: String,
    pub title: String,
    pub content: String,
    pub full_text: String,
    #[serde(default)]
    pub posted_at: String,
}

/// NFC正規化し、DCアプリの署名と英字を取り除き、空白を1つにまとめる。
#[must_use]
pub fn clean_text(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    let text = APP_SIGNATURE.replace_all(&normalized, "");
    let text = LATIN_RUN.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// ファイル名に使えない文字を `_` にする。
#[must_use]
pub fn safe_name(community: &str) -> String {
    UNSAFE_NAME.replace_all(community, "_").into_owned()
}

fn clean_row(raw: RawRow) -> CleanedRow {
    let site = raw.site.unwrap_or_default();
    let gallery = raw.gallery.unwrap_or_default();
    let title = clean_text(raw.title.as_deref().unwrap_or_default());
    let content = clean_text(raw.content.as_deref().unwrap_or_default());
    let full_text = format!("{title} {content}").trim().to_string();

    CleanedRow {
        community: format!("{site}_{gallery}"),
        title,
        content,
        full_text,
        posted_at: raw.posted_at.unwrap_or_default(),
    }
}

fn load_raw_file(path: &Path) -> Result<Option<Vec<CleanedRow>>> {
    let headers = read_headers(path)?;
    if !headers.iter().any(|h| h == "title") {
        return Ok(None);
    }
    let rows: Vec<RawRow> = read_records(path)?;
    Ok(Some(rows.into_iter().map(clean_row).collect()))
}

/// 全文の重複（最初の出現を残す）と空行を取り除き、コミュニティ別に出現順でまとめる。
fn group_unique(rows: Vec<CleanedRow>) -> Vec<(String, Vec<CleanedRow>)> {
    let mut seen = HashSet::new();
    let mut order: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<CleanedRow>)> = Vec::new();

    for row in rows {
        if !seen.insert(row.full_text.clone()) || row.full_text.is_empty() {
            continue;
        }
        let index = *order.entry(row.community.clone()).or_insert_with(|| {
            groups.push((row.community.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[index].1.push(row);
    }
    groups
}

/// `raw/` の全CSVを精製して `preprocessed/` に書き出す。
///
/// # Errors
/// 入出力に失敗した場合はエラーを返す。読めないファイルは警告を出して飛ばす。
pub fn run(layout: &DataLayout, filter: Option<&str>) -> Result<StageSummary> {
    let mut summary = StageSummary::new("clean");
    let files = stage_files(&layout.raw_dir(), "", filter)?;
    if files.is_empty() {
        warn!(dir = %layout.raw_dir().display(), "no raw CSV files found");
        return Ok(summary);
    }

    let mut all_rows = Vec::new();
    for path in &files {
        match load_raw_file(path) {
            Ok(Some(rows)) => {
                info!(file = %path.display(), rows = rows.len(), "loaded raw file");
                summary.files += 1;
                summary.rows_in += rows.len();
                all_rows.extend(rows);
            }
            Ok(None) => warn!(file = %path.display(), "skipping file without title column"),
            Err(error) => warn!(file = %path.display(), error = %format!("{error:#}"), "failed to load raw file"),
        }
    }

    let output_dir = layout.preprocessed_dir();
    for (community, rows) in group_unique(all_rows) {
        let path = output_dir.join(format!("{OUTPUT_PREFIX}{}.csv", safe_name(&community)));
        write_records(&path, &rows)?;
        info!(community = %community, rows = rows.len(), file = %path.display(), "cleaned rows written");
        summary.rows_out += rows.len();
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    #[rstest]
    #[case("오늘   경기 - dc official App", "오늘 경기")]
    #[case("Messi 골 미쳤다 ㅋㅋ", "골 미쳤다 ㅋㅋ")]
    #[case("  줄\n바꿈\t탭  ", "줄 바꿈 탭")]
    #[case("-DC Official app", "")]
    fn clean_text_strips_latin_and_signature(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean_text(input), expected);
    }

    #[test]
    fn clean_text_composes_jamo() {
        // 分解されたハングル（NFD）を合成する
        let decomposed: String = "한글".nfd().collect();
        assert_eq!(clean_text(&decomposed), "한글");
    }

    #[test]
    fn safe_name_replaces_separators() {
        assert_eq!(safe_name("dcinside_해외축구 갤러리"), "dcinside_해외축구_갤러리");
        assert_eq!(safe_name("theqoo_beauty/category"), "theqoo_beauty_category");
    }

    fn cleaned(community: &str, full_text: &str) -> CleanedRow {
        CleanedRow {
            community: community.into(),
            title: String::new(),
            content: full_text.into(),
            full_text: full_text.into(),
            posted_at: String::new(),
        }
    }

    #[test]
    fn group_unique_compares_whole_text() {
        let groups = group_unique(vec![
            cleaned("a", "본문이다"),
            cleaned("a", ""),
            cleaned("b", "본문이다"),
            cleaned("b", "본문이다 "),
            cleaned("b", "본문이다."),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "a");
        assert_eq!(groups[0].1.len(), 1);
        let b: Vec<&str> = groups[1].1.iter().map(|row| row.full_text.as_str()).collect();
        assert_eq!(b, ["본문이다 ", "본문이다."]);
    }

    #[test]
    fn run_dedups_across_files_and_splits_by_community() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = DataLayout::new(dir.path());
        let raw = layout.raw_dir();
        fs::create_dir_all(&raw).expect("raw dir");
        fs::write(
            raw.join("dcinside_a_posts.csv"),
            "site,gallery,title,content,posted_at\n\
             dcinside,a,제목,본문 - dc official App,2024-05-01T10:00:00\n\
             dcinside,a,제목,본문,2024-05-01T11:00:00\n\
             dcinside,a,ABC,,\n",
        )
        .expect("write");
        fs::write(
            raw.join("theqoo_b_posts.csv"),
            "site,gallery,title,content,posted_at\n\
             theqoo,b,제목,본문,2024-05-02T00:00:00\n\
             theqoo,b,다른 글,내용,2024-05-02T01:00:00\n",
        )
        .expect("write");
        fs::write(raw.join("dcinside_a_comments.csv"), "site,source_id,content\ndcinside,1,댓글\n")
            .expect("write");

        let summary = run(&layout, None).expect("clean");
        assert_eq!(summary.files, 2);
        assert_eq!(summary.rows_in, 5);
        assert_eq!(summary.rows_out, 2);

        let a: Vec<CleanedRow> =
            read_records(&layout.preprocessed_dir().join("cleaned_dcinside_a.csv")).expect("a");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].full_text, "제목 본문");
        assert_eq!(a[0].posted_at, "2024-05-01T10:00:00");

        let b: Vec<CleanedRow> =
            read_records(&layout.preprocessed_dir().join("cleaned_theqoo_b.csv")).expect("b");
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].title, "다른 글");
    }
}

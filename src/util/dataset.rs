/// ステージ間で受け渡すCSVデータセットの入出力ヘルパー。
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// CSVファイルを読み込み、全行をデシリアライズする。
///
/// # Errors
/// ファイルが開けない場合や行のデシリアライズに失敗した場合はエラーを返す。
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for (line, record) in reader.deserialize().enumerate() {
        let record: T = record
            .with_context(|| format!("failed to parse row {} of {}", line + 1, path.display()))?;
        records.push(record);
    }
    Ok(records)
}

/// CSVのヘッダー行を返す。
///
/// # Errors
/// ファイルが開けない場合はエラーを返す。
pub fn read_headers(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read headers of {}", path.display()))?;
    Ok(headers.iter().map(|h| h.trim_start_matches('\u{feff}').to_string()).collect())
}

/// 全行をCSVとして書き出す（既存ファイルは上書き）。
///
/// # Errors
/// ディレクトリ作成・書き込みに失敗した場合はエラーを返す。
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// 既存ファイルに行を追記する。ファイルが空のときだけヘッダーを書く。
///
/// # Errors
/// 書き込みに失敗した場合はエラーを返す。
pub fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let needs_header = fs::metadata(path).map_or(true, |meta| meta.len() == 0);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("failed to append row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

/// `dir` 直下の `{prefix}*.csv` を名前順に列挙する。
///
/// `.partial.csv` は除外し、`filter` が指定された場合はファイル名にその文字列を含むものだけを返す。
///
/// # Errors
/// ディレクトリが読めない場合はエラーを返す。存在しない場合は空を返す。
pub fn stage_files(dir: &Path, prefix: &str, filter: Option<&str>) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file()
            || !name.starts_with(prefix)
            || !name.ends_with(".csv")
            || name.ends_with(".partial.csv")
        {
            continue;
        }
        if filter.is_some_and(|needle| !name.contains(needle)) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// `tagged_foo.csv` のようなファイル名からコミュニティ名を取り出す。
#[must_use]
pub fn community_from_path(path: &Path, prefix: &str) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.strip_prefix(prefix).unwrap_or(stem).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_append_keeps_single_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/rows.csv");

        append_records(&path, &[Row { name: "가".into(), count: 1 }]).expect("append");
        append_records(&path, &[Row { name: "나".into(), count: 2 }]).expect("append");

        let rows: Vec<Row> = read_records(&path).expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "나");
        assert_eq!(read_headers(&path).expect("headers"), vec!["name", "count"]);
    }

    #[test]
    fn stage_files_filters_prefix_partial_and_gallery() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "morph_dcinside_football.csv",
            "morph_theqoo_beauty.csv",
            "morph_theqoo_beauty.partial.csv",
            "tagged_theqoo_beauty.csv",
            "morph_notes.txt",
        ] {
            fs::write(dir.path().join(name), "a\n").expect("write");
        }

        let all = stage_files(dir.path(), "morph_", None).expect("list");
        assert_eq!(all.len(), 2);

        let filtered = stage_files(dir.path(), "morph_", Some("theqoo")).expect("list");
        assert_eq!(filtered.len(), 1);
        assert_eq!(community_from_path(&filtered[0], "morph_"), "theqoo_beauty");
    }

    #[test]
    fn stage_files_returns_empty_for_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = stage_files(&dir.path().join("absent"), "x_", None).expect("list");
        assert!(files.is_empty());
    }
}

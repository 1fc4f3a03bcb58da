/// クロール結果を `site_gallery` ごとのCSVに書き出す。
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::model::{Comment, Meta, Post};
use crate::util::dataset::write_records;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// 1つのプレフィックスについて書き出したファイル。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportPaths {
    pub posts_csv: Option<PathBuf>,
    pub comments_csv: Option<PathBuf>,
}

/// 小文字化し、英数字（ハングルを含む）以外を `_` に置き換える。
#[must_use]
pub fn slugify(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// `{site}_{gallery}` 形式のファイル名プレフィックス。
#[must_use]
pub fn source_prefix(site: &str, gallery: Option<&str>) -> String {
    let site_slug = Some(slugify(site))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "data".to_string());
    match gallery.map(slugify).filter(|g| !g.is_empty()) {
        Some(gallery_slug) => format!("{site_slug}_{gallery_slug}"),
        None => site_slug,
    }
}

fn format_timestamp(value: Option<NaiveDateTime>) -> String {
    value
        .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn meta_json(meta: &Meta) -> Result<String> {
    serde_json::to_string(meta).context("failed to serialize meta")
}

/// `raw/*_posts.csv` の1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRow {
    pub site: String,
    pub gallery: String,
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub posted_at: String,
    pub comment_count: u32,
    pub meta: String,
}

impl PostRow {
    fn from_post(post: &Post) -> Result<Self> {
        Ok(Self {
            site: post.site.clone(),
            gallery: post.gallery.clone(),
            source_id: post.source_id.clone(),
            url: post.url.clone(),
            title: post.title.clone(),
            content: post.content.clone(),
            author: post.author.clone(),
            posted_at: format_timestamp(post.posted_at),
            comment_count: post.comment_count,
            meta: meta_json(&post.meta)?,
        })
    }
}

/// `raw/*_comments.csv` の1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRow {
    pub site: String,
    pub source_id: String,
    pub author: Option<String>,
    pub content: String,
    pub posted_at: String,
    pub meta: String,
}

impl CommentRow {
    fn from_comment(comment: &Comment) -> Result<Self> {
        Ok(Self {
            site: comment.site.clone(),
            source_id: comment.source_id.clone(),
            author: comment.author.clone(),
            content: comment.content.clone(),
            posted_at: format_timestamp(comment.posted_at),
            meta: meta_json(&comment.meta)?,
        })
    }
}

/// コメントのグループ名はメタの `gallery` → `gallery_id` → `board` の順に探す。
fn comment_group(comment: &Comment) -> Option<String> {
    ["gallery", "gallery_id", "board"].iter().find_map(|key| {
        match comment.meta.get(*key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Null | Value::String(_) => None,
            other => Some(other.to_string()),
        }
    })
}

/// 投稿とコメントをソースごとにまとめて `raw_dir` に書き出す。
///
/// # Errors
/// シリアライズまたはファイル書き込みに失敗した場合はエラーを返す。
pub fn export_by_source(
    raw_dir: &Path,
    posts: &[Post],
    comments: &[Comment],
) -> Result<BTreeMap<String, ExportPaths>> {
    let mut posts_by: BTreeMap<String, Vec<PostRow>> = BTreeMap::new();
    for post in posts {
        let key = source_prefix(&post.site, Some(&post.gallery));
        posts_by.entry(key).or_default().push(PostRow::from_post(post)?);
    }

    let mut comments_by: BTreeMap<String, Vec<CommentRow>> = BTreeMap::new();
    for comment in comments {
        let key = source_prefix(&comment.site, comment_group(comment).as_deref());
        comments_by
            .entry(key)
            .or_default()
            .push(CommentRow::from_comment(comment)?);
    }

    let mut results: BTreeMap<String, ExportPaths> = BTreeMap::new();
    for (key, rows) in posts_by {
        let path = raw_dir.join(format!("{key}_posts.csv"));
        write_records(&path, &rows)?;
        info!(path = %path.display(), rows = rows.len(), "posts exported");
        results.entry(key).or_default().posts_csv = Some(path);
    }
    for (key, rows) in comments_by {
        let path = raw_dir.join(format!("{key}_comments.csv"));
        write_records(&path, &rows)?;
        info!(path = %path.display(), rows = rows.len(), "comments exported");
        results.entry(key).or_default().comments_csv = Some(path);
    }
    Ok(results)
}

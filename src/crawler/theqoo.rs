/// TheQoo 掲示板のクローラー（投稿のみ、コメントは収集しない）。
use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDateTime};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::html::{first, first_text, has_class, own_text, selector, text_of};
use super::{
    PageFetcher, extract_int, fix_century, korea_now, page_range, parse_clock_today, parse_with_formats,
};
use crate::model::{CrawlResult, Meta, Post, insert_opt};
use crate::util::progress::progress_bar;

pub const SITE: &str = "theqoo";
const BASE_URL: &str = "https://theqoo.net";

static LIST_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("table.bd_lst tbody tr"));
static TITLE_CELLS: LazyLock<Selector> = LazyLock::new(|| selector("td.title"));
static TITLE_ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("td.title a[href]"));
static NOTICE_MARK: LazyLock<Selector> = LazyLock::new(|| selector("td.no strong"));
static REPLY_NUM: LazyLock<Selector> = LazyLock::new(|| selector("td.title a.replyNum"));
static CATEGORY: LazyLock<Selector> = LazyLock::new(|| selector("td.cate"));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("td.time"));
static VIEWS: LazyLock<Selector> = LazyLock::new(|| selector("td.m_no"));

static HEADER_TITLE: LazyLock<Selector> =
    LazyLock::new(|| selector(".theqoo_document_header .title"));
static HEADER_CATEGORY: LazyLock<Selector> =
    LazyLock::new(|| selector(".theqoo_document_header .cate"));
static ARTICLE_BODY: LazyLock<Selector> =
    LazyLock::new(|| selector("article[itemprop='articleBody']"));
static AUTHOR_BLOCK: LazyLock<Selector> = LazyLock::new(|| selector(".board .btm_area .side"));
static DETAIL_DATE: LazyLock<Selector> = LazyLock::new(|| selector(".board .btm_area .side.fr span"));
static COMMENT_HEADER: LazyLock<Selector> =
    LazyLock::new(|| selector(".fdb_lst .comment_header_bar"));

/// 1つの掲示板のクロール設定。
#[derive(Debug, Clone, PartialEq)]
pub struct TheQooBoardConfig {
    /// `beauty`, `beauty/category/25604` など
    pub path: String,
    pub name: Option<String>,
    pub start_page: u32,
    pub max_pages: u32,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
}

impl Default for TheQooBoardConfig {
    fn default() -> Self {
        Self::new("talk")
    }
}

impl TheQooBoardConfig {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
            start_page: 1,
            max_pages: 1,
            start_date: None,
            end_date: None,
        }
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        let path = self.path.trim_start_matches('/');
        let separator = if path.contains('?') { '&' } else { '?' };
        format!("{BASE_URL}/{path}{separator}page={page}")
    }

    fn has_range(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    fn is_before_start(&self, posted_at: Option<NaiveDateTime>) -> bool {
        matches!((self.start_date, posted_at), (Some(start), Some(at)) if at < start)
    }

    fn is_after_end(&self, posted_at: Option<NaiveDateTime>) -> bool {
        matches!((self.end_date, posted_at), (Some(end), Some(at)) if at > end)
    }
}

/// 一覧の日付（`2024.05.01`, `24.05.01`, `05.01`, `12:34`, `05-01`）を読む。
#[must_use]
pub fn parse_list_date(value: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    parse_with_formats(value, &["%Y.%m.%d", "%y.%m.%d"])
        .map(fix_century)
        .or_else(|| {
            // 年を省略した日付は今年とみなす
            let year = now.year();
            parse_with_formats(&format!("{year}.{value}"), &["%Y.%m.%d"])
        })
        .or_else(|| parse_clock_today(value, now))
        .or_else(|| {
            let year = now.year();
            parse_with_formats(&format!("{year}-{value}"), &["%Y-%m-%d"])
        })
}

/// 投稿URLの最後の数字セグメントを投稿IDとして取り出す。
#[must_use]
pub fn extract_post_id(href: &str) -> Option<String> {
    let href = href.split('#').next().unwrap_or_default();
    let last = href.trim_matches('/').rsplit('/').next()?;
    let last = last.split('?').next().unwrap_or_default();
    (!last.is_empty() && last.chars().all(|c| c.is_ascii_digit())).then(|| last.to_string())
}

/// 一覧の1行。
#[derive(Debug, Clone, PartialEq)]
pub struct ListRow {
    pub post_id: String,
    pub href: String,
    pub title: String,
    pub category: Option<String>,
    pub posted_at: Option<NaiveDateTime>,
    pub views: Option<u64>,
    pub comment_count: Option<u64>,
}

fn row_nodes(document: &Html) -> Vec<ElementRef<'_>> {
    let rows: Vec<ElementRef<'_>> = document.select(&LIST_ROWS).collect();
    if !rows.is_empty() {
        return rows;
    }
    document
        .select(&TITLE_CELLS)
        .filter_map(|cell| {
            cell.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "tr")
        })
        .collect()
}

/// 一覧ページを解析する。公知の行と重複IDは除く。
#[must_use]
pub fn parse_list_page(html: &str, now: NaiveDateTime) -> Vec<ListRow> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for row in row_nodes(&document) {
        if has_class(&row, "notice") {
            continue;
        }
        let Some(anchor) = first(&row, &TITLE_ANCHOR) else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default().to_string();
        let Some(post_id) = extract_post_id(&href) else {
            continue;
        };
        if first_text(&row, &NOTICE_MARK).is_some_and(|text| text.contains("공지")) {
            continue;
        }
        if !seen.insert(post_id.clone()) {
            continue;
        }

        rows.push(ListRow {
            post_id,
            href,
            title: text_of(&anchor, ""),
            category: first_text(&row, &CATEGORY),
            posted_at: first_text(&row, &TIME).and_then(|t| parse_list_date(&t, now)),
            views: first_text(&row, &VIEWS).and_then(|t| extract_int(&t)),
            comment_count: first_text(&row, &REPLY_NUM).and_then(|t| extract_int(&t)),
        });
    }
    rows
}

/// 詳細ページから取り出した情報。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detail {
    pub title: Option<String>,
    pub category: Option<String>,
    pub content: String,
    pub author: Option<String>,
    pub posted_at: Option<NaiveDateTime>,
    pub comment_count: Option<u64>,
}

#[must_use]
pub fn parse_detail_page(html: &str, now: NaiveDateTime) -> Detail {
    let document = Html::parse_document(html);
    let root = document.root_element();

    Detail {
        title: first_text(&root, &HEADER_TITLE),
        category: first_text(&root, &HEADER_CATEGORY),
        content: first(&root, &ARTICLE_BODY)
            .map(|node| text_of(&node, "\n"))
            .unwrap_or_default(),
        author: first(&root, &AUTHOR_BLOCK).and_then(|node| own_text(&node)),
        posted_at: first_text(&root, &DETAIL_DATE).and_then(|t| parse_list_date(&t, now)),
        comment_count: first_text(&root, &COMMENT_HEADER).and_then(|t| extract_int(&t)),
    }
}

fn absolute_url(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{BASE_URL}/{}", href.trim_start_matches('/'))
    }
}

/// TheQoo クローラー。
pub struct TheQooCrawler<'a> {
    fetcher: &'a dyn PageFetcher,
}

impl<'a> TheQooCrawler<'a> {
    #[must_use]
    pub fn new(fetcher: &'a dyn PageFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn crawl(&self, boards: &[TheQooBoardConfig]) -> CrawlResult {
        let mut result = CrawlResult::default();
        for config in boards {
            result.posts.extend(self.crawl_board(config).await);
        }
        result
    }

    async fn crawl_board(&self, config: &TheQooBoardConfig) -> Vec<Post> {
        let mut posts = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let label = config.label();
        let progress = progress_bar(config.max_pages as usize, &format!("[{label}] page"));

        'pages: for page in page_range(config.start_page, config.max_pages) {
            let html = match self.fetcher.fetch(&config.page_url(page)).await {
                Ok(html) => html,
                Err(error) => {
                    warn!(board = label, page, error = %error, "failed to fetch list page; stopping");
                    break;
                }
            };
            let now = korea_now();

            for row in parse_list_page(&html, now) {
                if !seen.insert(row.post_id.clone()) {
                    continue;
                }
                if config.is_before_start(row.posted_at) {
                    debug!(board = label, page, "reached posts older than start date");
                    break 'pages;
                }
                if config.is_after_end(row.posted_at) {
                    continue;
                }
                if config.has_range() && row.posted_at.is_none() {
                    continue;
                }

                let url = absolute_url(&row.href);
                let detail = match self.fetcher.fetch(&url).await {
                    Ok(html) => Some(parse_detail_page(&html, now)),
                    Err(error) => {
                        warn!(post_id = %row.post_id, error = %error, "failed to fetch post detail");
                        None
                    }
                };
                let detail_posted_at = detail.as_ref().and_then(|d| d.posted_at);
                if config.is_before_start(detail_posted_at) {
                    break 'pages;
                }
                if config.is_after_end(detail_posted_at) {
                    continue;
                }

                posts.push(build_post(config, row, detail, url));
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        info!(board = label, posts = posts.len(), "theqoo board crawled");
        posts
    }
}

fn build_post(config: &TheQooBoardConfig, row: ListRow, detail: Option<Detail>, url: String) -> Post {
    let detail = detail.unwrap_or_default();

    let mut meta = Meta::new();
    meta.insert("board_path".into(), Value::from(config.path.as_str()));
    insert_opt(&mut meta, "category", row.category);
    insert_opt(&mut meta, "views", row.views);
    insert_opt(&mut meta, "detail_category", detail.category);
    meta.insert("detail_url".into(), Value::from(url.as_str()));

    let comment_count = detail
        .comment_count
        .filter(|count| *count > 0)
        .or(row.comment_count)
        .unwrap_or_default();

    Post {
        site: SITE.to_string(),
        gallery: config.label().to_string(),
        source_id: row.post_id,
        url,
        title: detail.title.filter(|t| !t.is_empty()).unwrap_or(row.title),
        content: detail.content,
        author: detail.author,
        posted_at: detail.posted_at.or(row.posted_at),
        comment_count: u32::try_from(comment_count).unwrap_or(u32::MAX),
        meta,
        comments: Vec::new(),
    }
}

/// Instiz 掲示板（이슈 カテゴリなど）のクローラー。
use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use super::html::{attr, first, first_text, selector, text_of};
use super::{PageFetcher, extract_int, kst, page_range, parse_with_formats};
use crate::model::{Comment, CrawlResult, Meta, Post};
use crate::util::progress::progress_bar;

pub const SITE: &str = "instiz";
const BASE_URL: &str = "https://www.instiz.net";

static LIST_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("tr[id^='list']"));
static ANY_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static SUBJECT: LazyLock<Selector> = LazyLock::new(|| selector("div.sbj"));
static LIST_NO: LazyLock<Selector> = LazyLock::new(|| selector("div.listno"));
static COMMENT_COUNT: LazyLock<Selector> = LazyLock::new(|| selector("span.cmt"));

static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:title"]"#));
static OG_IMAGE: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:image"]"#));
static PUBLISHED: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[property="article:published_time"]"#));
static MEMO: LazyLock<Selector> = LazyLock::new(|| selector("div.memo_content"));

static COMMENT_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("#ajax_table tr"));
static COMMENT_AUTHOR: LazyLock<Selector> = LazyLock::new(|| selector(".href"));
static COMMENT_BODY: LazyLock<Selector> =
    LazyLock::new(|| selector(".comment_line span[id^='n']"));
static COMMENT_TIME: LazyLock<Selector> = LazyLock::new(|| selector(".comment_line .minitext"));

#[derive(Debug, Clone, PartialEq)]
pub struct InstizBoardConfig {
    pub board: String,
    pub start_page: u32,
    pub max_pages: u32,
    pub include_comments: bool,
}

impl Default for InstizBoardConfig {
    fn default() -> Self {
        Self::new("pt")
    }
}

impl InstizBoardConfig {
    #[must_use]
    pub fn new(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            start_page: 1,
            max_pages: 2,
            include_comments: true,
        }
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        format!("{BASE_URL}/{}?page={page}", self.board)
    }
}

/// 一覧の1行。
#[derive(Debug, Clone, PartialEq)]
pub struct ListRow {
    pub post_id: String,
    pub href: String,
    pub title: Option<String>,
    pub views: Option<u64>,
    pub comment_count: Option<u64>,
}

/// URL末尾のセグメント（クエリ除去後）が数字ならそれを投稿IDとする。
#[must_use]
pub fn extract_post_id(href: &str) -> Option<String> {
    let last = href.rsplit('/').next()?;
    let last = last.split('?').next().unwrap_or_default();
    (!last.is_empty() && last.chars().all(|c| c.is_ascii_digit())).then(|| last.to_string())
}

/// `조회` の後に続く最初の数値を閲覧数とする。
fn extract_views(text: &str) -> Option<u64> {
    let (_, after) = text.split_once("조회")?;
    let digits: String = after
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// 一覧ページを解析する。行が1つもなければ `None`（ページ送りの終了）。
#[must_use]
pub fn parse_list_page(html: &str) -> Option<Vec<ListRow>> {
    let document = Html::parse_document(html);
    let mut rows = document.select(&LIST_ROWS).peekable();
    rows.peek()?;

    Some(
        rows.filter_map(|row| {
            let href = attr(&first(&row, &ANY_LINK)?, "href")?;
            let post_id = extract_post_id(&href)?;
            Some(ListRow {
                post_id,
                href,
                title: first(&row, &SUBJECT)
                    .map(|node| text_of(&node, " "))
                    .filter(|t| !t.is_empty()),
                views: first(&row, &LIST_NO).and_then(|node| extract_views(&text_of(&node, " "))),
                comment_count: first_text(&row, &COMMENT_COUNT).and_then(|t| extract_int(&t)),
            })
        })
        .collect(),
    )
}

fn meta_content(root: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    first(root, selector).and_then(|node| attr(&node, "content"))
}

/// ISO 8601 の公開時刻を韓国時間の壁時計時刻にする。
fn parse_published(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|at| at.with_timezone(&kst()).naive_local())
        .or_else(|| parse_with_formats(value, &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]))
}

/// `onmouseover` 属性に埋め込まれた `YYYY/MM/DD HH:MM:SS` を探す。
fn parse_comment_time(onmouseover: &str) -> Option<NaiveDateTime> {
    onmouseover
        .split(['\'', '"'])
        .map(str::trim)
        .filter(|part| part.starts_with("202"))
        .find_map(|part| NaiveDateTime::parse_from_str(part, "%Y/%m/%d %H:%M:%S").ok())
}

fn parse_comment_row(row: &ElementRef<'_>, post_id: &str, index: usize, board: &str) -> Option<Comment> {
    let body = first(row, &COMMENT_BODY)?;
    let posted_at = first(row, &COMMENT_TIME)
        .and_then(|node| node.value().attr("onmouseover").map(ToString::to_string))
        .and_then(|raw| parse_comment_time(&raw));

    let mut meta = Meta::new();
    meta.insert("post_id".into(), Value::from(post_id));
    meta.insert("board".into(), Value::from(board));

    Some(Comment {
        site: SITE.to_string(),
        source_id: format!("{post_id}_{index}"),
        author: first_text(row, &COMMENT_AUTHOR),
        content: text_of(&body, " "),
        posted_at,
        meta,
    })
}

/// 詳細ページから投稿とコメントを組み立てる。
#[must_use]
pub fn parse_detail_page(html: &str, board: &str, row: &ListRow, detail_url: &str) -> (Post, Vec<Comment>) {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title = meta_content(&root, &OG_TITLE)
        .or_else(|| row.title.clone())
        .unwrap_or_default();
    let mut content = first(&root, &MEMO)
        .map(|node| text_of(&node, "\n"))
        .unwrap_or_default();
    if let Some(image) = meta_content(&root, &OG_IMAGE) {
        content = if content.is_empty() {
            image
        } else {
            format!("{content}\n[이미지] {image}")
        };
    }

    let comments: Vec<Comment> = document
        .select(&COMMENT_ROWS)
        .enumerate()
        .filter_map(|(idx, tr)| parse_comment_row(&tr, &row.post_id, idx + 1, board))
        .collect();

    let mut meta = Meta::new();
    meta.insert("board".into(), Value::from(board));
    if let Some(views) = row.views {
        meta.insert("views".into(), Value::from(views));
    }

    let post = Post {
        site: SITE.to_string(),
        gallery: board.to_string(),
        source_id: row.post_id.clone(),
        url: detail_url.to_string(),
        title,
        content,
        author: None,
        posted_at: meta_content(&root, &PUBLISHED).and_then(|v| parse_published(&v)),
        comment_count: u32::try_from(comments.len()).unwrap_or(u32::MAX),
        meta,
        comments: Vec::new(),
    };
    (post, comments)
}

fn detail_url(href: &str) -> String {
    Url::parse(BASE_URL)
        .and_then(|base| base.join(href))
        .map_or_else(|_| format!("{BASE_URL}{href}"), String::from)
}

/// Instiz クローラー。
pub struct InstizCrawler<'a> {
    fetcher: &'a dyn PageFetcher,
}

impl<'a> InstizCrawler<'a> {
    #[must_use]
    pub fn new(fetcher: &'a dyn PageFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn crawl(&self, boards: &[InstizBoardConfig]) -> CrawlResult {
        let mut result = CrawlResult::default();
        for config in boards {
            result.extend(self.crawl_board(config).await);
        }
        result
    }

    async fn crawl_board(&self, config: &InstizBoardConfig) -> CrawlResult {
        let mut result = CrawlResult::default();
        let mut seen: HashSet<String> = HashSet::new();
        let board = config.board.as_str();
        let progress = progress_bar(config.max_pages as usize, &format!("[Instiz {board}] page"));

        for page in page_range(config.start_page, config.max_pages) {
            let html = match self.fetcher.fetch(&config.page_url(page)).await {
                Ok(html) => html,
                Err(error) => {
                    warn!(board, page, error = %error, "failed to fetch list page; stopping");
                    break;
                }
            };
            let Some(rows) = parse_list_page(&html) else {
                break;
            };

            for row in rows {
                if seen.contains(&row.post_id) {
                    continue;
                }
                let url = detail_url(&row.href);
                let detail_html = match self.fetcher.fetch(&url).await {
                    Ok(html) => html,
                    Err(error) => {
                        warn!(post_id = %row.post_id, error = %error, "failed to fetch post detail");
                        continue;
                    }
                };
                let (post, comments) = parse_detail_page(&detail_html, board, &row, &url);
                seen.insert(row.post_id);
                result.posts.push(post);
                if config.include_comments {
                    result.comments.extend(comments);
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        info!(
            board,
            posts = result.posts.len(),
            comments = result.comments.len(),
            "instiz board crawled"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LIST_HTML: &str = r#"
        <table>
          <tr id="list1">
            <td><a href="https://www.instiz.net/pt/7654321?page=1">
              <div class="sbj">오늘 날씨 <span class="cmt">23</span></div></a></td>
            <td><div class="listno">10:20 조회 1,024 추천 5</div></td>
          </tr>
          <tr id="list2"><td><a href="/pt/notice">공지</a></td></tr>
          <tr id="detour"><td><a href="/pt/1">무시</a></td></tr>
        </table>
    "#;

    const DETAIL_HTML: &str = r#"
        <html><head>
          <meta property="og:title" content="오늘 날씨 진짜 좋다">
          <meta property="og:image" content="https://img.instiz.net/a.jpg">
          <meta property="article:published_time" content="2024-05-01T03:00:00Z">
        </head><body>
          <div class="memo_content"><p>산책 가자</p><p>다들 뭐해</p></div>
          <table id="ajax_table">
            <tr><td><span class="href">익명1</span>
              <div class="comment_line"><span id="n101">나도 <b>가고 싶다</b></span>
              <span class="minitext" onmouseover="tooltip('2024/05/01 12:30:00')">1시간 전</span></div></td></tr>
            <tr><td>광고</td></tr>
            <tr><td><div class="comment_line"><span id="n102">ㅇㅇ</span></div></td></tr>
          </table>
        </body></html>
    "#;

    #[test]
    fn list_rows_need_numeric_ids() {
        let rows = parse_list_page(LIST_HTML).expect("rows");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.post_id, "7654321");
        assert_eq!(row.title.as_deref(), Some("오늘 날씨 23"));
        assert_eq!(row.views, Some(1024));
        assert_eq!(row.comment_count, Some(23));
    }

    #[test]
    fn empty_list_ends_pagination() {
        assert!(parse_list_page("<html><body>점검 중</body></html>").is_none());
    }

    #[test]
    fn detail_page_builds_post_and_comments() {
        let row = parse_list_page(LIST_HTML).expect("rows").remove(0);
        let url = detail_url(&row.href);
        let (post, comments) = parse_detail_page(DETAIL_HTML, "pt", &row, &url);

        assert_eq!(post.title, "오늘 날씨 진짜 좋다");
        assert_eq!(
            post.content,
            "산책 가자\n다들 뭐해\n[이미지] https://img.instiz.net/a.jpg"
        );
        let published = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("date");
        assert_eq!(post.posted_at, Some(published));
        assert_eq!(post.comment_count, 2);
        assert_eq!(post.meta["views"], Value::from(1024));

        assert_eq!(comments[0].source_id, "7654321_1");
        assert_eq!(comments[0].author.as_deref(), Some("익명1"));
        assert_eq!(comments[0].content, "나도 가고 싶다");
        assert_eq!(comments[0].posted_at.map(|t| t.to_string()).as_deref(), Some("2024-05-01 12:30:00"));
        assert_eq!(comments[1].source_id, "7654321_3");
        assert!(comments[1].author.is_none());
    }

    #[test]
    fn image_only_post_uses_image_url() {
        let row = ListRow {
            post_id: "1".into(),
            href: "/pt/1".into(),
            title: Some("목록 제목".into()),
            views: None,
            comment_count: None,
        };
        let html = r#"<meta property="og:image" content="https://img.instiz.net/b.png">"#;
        let (post, comments) = parse_detail_page(html, "pt", &row, "https://www.instiz.net/pt/1");
        assert_eq!(post.title, "목록 제목");
        assert_eq!(post.content, "https://img.instiz.net/b.png");
        assert!(post.posted_at.is_none());
        assert!(comments.is_empty());
    }

    #[test]
    fn relative_links_join_base() {
        assert_eq!(detail_url("/pt/42"), "https://www.instiz.net/pt/42");
        assert_eq!(
            detail_url("https://www.instiz.net/name/9"),
            "https://www.instiz.net/name/9"
        );
    }
}

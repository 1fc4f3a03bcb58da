/// DCInside ギャラリーのクローラー。
///
/// 一覧ページから投稿IDを集め、詳細ページで本文とコメントを取得する。
use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::html::{attr, first, first_text, selector, text_of};
use super::{
    PageFetcher, extract_int, fix_century, korea_now, page_range, parse_clock_today, parse_with_formats,
};
use crate::model::{Comment, CrawlResult, Meta, Post, insert_opt};
use crate::util::progress::progress_bar;

pub const SITE: &str = "dcinside";
const BASE_URL: &str = "https://gall.dcinside.com";

const DETAIL_FORMATS: [&str; 4] = [
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d",
    "%y.%m.%d %H:%M:%S",
    "%y.%m.%d",
];

const LIST_FORMATS: [&str; 9] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y.%m.%d %H:%M:%S",
    "%y.%m.%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%y/%m/%d %H:%M:%S",
    "%Y.%m.%d",
    "%Y/%m/%d",
    "%y.%m.%d",
    "%y/%m/%d",
];

static LIST_ROWS: LazyLock<Selector> =
    LazyLock::new(|| selector("table.gall_list tbody tr.ub-content"));
static NUMBER_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.gall_num"));
static TITLE_ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("td.gall_tit a[href]"));
static DATE_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.gall_date"));
static WRITER_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.gall_writer"));
static NICKNAME: LazyLock<Selector> = LazyLock::new(|| selector("span.nickname"));
static IP: LazyLock<Selector> = LazyLock::new(|| selector("span.ip"));
static VIEWS_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.gall_count"));
static RECOMMEND_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.gall_recommend"));
static REPLY_NUM: LazyLock<Selector> = LazyLock::new(|| selector("a.reply_numbox span.reply_num"));

static TITLE_SUBJECT: LazyLock<Selector> = LazyLock::new(|| selector("span.title_subject"));
static WRITE_DIV: LazyLock<Selector> = LazyLock::new(|| selector("div.write_div"));
static POST_DATE: LazyLock<Selector> = LazyLock::new(|| selector("span.gall_date"));
static POST_VIEWS: LazyLock<Selector> = LazyLock::new(|| selector("span.gall_count"));
static POST_RECOMMEND: LazyLock<Selector> = LazyLock::new(|| selector("span.gall_reply_num"));
static COMMENT_ITEMS: LazyLock<Selector> = LazyLock::new(|| selector("li.ub-content"));
static COMMENT_TEXT: LazyLock<Selector> = LazyLock::new(|| selector("p.usertxt"));
static COMMENT_REPLY: LazyLock<Selector> = LazyLock::new(|| selector("div.reply-content"));
static COMMENT_NICK: LazyLock<Selector> = LazyLock::new(|| selector("span.nick"));
static COMMENT_DATE: LazyLock<Selector> = LazyLock::new(|| selector("span.date_time"));

/// 1つのギャラリーのクロール設定。
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryConfig {
    pub gallery_id: String,
    pub name: Option<String>,
    pub start_page: u32,
    pub max_pages: u32,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub include_comments: bool,
}

impl GalleryConfig {
    #[must_use]
    pub fn new(gallery_id: impl Into<String>) -> Self {
        Self {
            gallery_id: gallery_id.into(),
            name: None,
            start_page: 1,
            max_pages: 3,
            start_date: None,
            end_date: None,
            include_comments: true,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// 表示名（未設定ならギャラリーID）。
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.gallery_id)
    }

    fn list_url(&self, page: u32) -> String {
        format!("{BASE_URL}/board/lists/?id={}&page={page}", self.gallery_id)
    }

    fn in_range(&self, posted_at: Option<NaiveDateTime>) -> bool {
        let Some(posted_at) = posted_at else {
            return true;
        };
        self.start_date.is_none_or(|start| posted_at >= start)
            && self.end_date.is_none_or(|end| posted_at <= end)
    }
}

/// 一覧ページの1行。
#[derive(Debug, Clone, PartialEq)]
pub struct ListRow {
    pub post_id: String,
    pub href: String,
    pub title: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub date_text: Option<String>,
    pub writer: Option<String>,
    pub writer_ip: Option<String>,
    pub writer_uid: Option<String>,
    pub views: Option<u64>,
    pub recommendations: Option<u64>,
    pub comment_count: Option<u64>,
}

/// 詳細ページの日時（`2024.05.01 12:34:56` など）を読む。
#[must_use]
pub fn parse_detail_datetime(value: &str) -> Option<NaiveDateTime> {
    parse_with_formats(value, &DETAIL_FORMATS).map(fix_century)
}

/// 一覧ページの日時を読む。`HH:MM` だけなら `now` の日付とみなす。
#[must_use]
pub fn parse_list_datetime(value: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let value = value.trim();
    parse_with_formats(value, &LIST_FORMATS)
        .map(fix_century)
        .or_else(|| {
            if value.matches(':').count() == 1 {
                parse_clock_today(value, now)
            } else {
                None
            }
        })
}

/// 一覧ページを解析する。投稿行が1つもなければ `None`（ページ送り終了）。
///
/// 公知行、番号セルのない行、数字でないID、`/board/view/` 以外へのリンクは除外する。
#[must_use]
pub fn parse_list_page(html: &str, now: NaiveDateTime) -> Option<Vec<ListRow>> {
    let document = Html::parse_document(html);
    let mut raw_rows = document.select(&LIST_ROWS).peekable();
    raw_rows.peek()?;

    let mut rows = Vec::new();
    for row in raw_rows {
        if row.value().attr("data-type") == Some("icon_notice") {
            continue;
        }
        let Some(number_cell) = first(&row, &NUMBER_CELL) else {
            continue;
        };
        let post_id = attr(&row, "data-no").unwrap_or_else(|| text_of(&number_cell, ""));
        if post_id.is_empty() || !post_id.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let Some(anchor) = first(&row, &TITLE_ANCHOR) else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default().to_string();
        if !href.starts_with("/board/view/") {
            continue;
        }

        let date_cell = first(&row, &DATE_CELL);
        let date_text = date_cell
            .as_ref()
            .and_then(|cell| attr(cell, "title"))
            .or_else(|| date_cell.as_ref().map(|cell| text_of(cell, "")))
            .filter(|text| !text.is_empty());
        let date = date_text
            .as_deref()
            .and_then(|text| parse_list_datetime(text, now));

        let (writer, writer_ip, writer_uid) = match first(&row, &WRITER_CELL) {
            Some(cell) => (
                first_text(&cell, &NICKNAME).or_else(|| Some(text_of(&cell, ""))),
                first_text(&cell, &IP),
                attr(&cell, "data-uid").or_else(|| attr(&cell, "user_id")),
            ),
            None => (None, None, None),
        };

        rows.push(ListRow {
            post_id,
            href,
            title: Some(text_of(&anchor, "")).filter(|t| !t.is_empty()),
            date,
            date_text,
            writer,
            writer_ip,
            writer_uid,
            views: first_text(&row, &VIEWS_CELL).and_then(|t| extract_int(&t)),
            recommendations: first_text(&row, &RECOMMEND_CELL).and_then(|t| extract_int(&t)),
            comment_count: first_text(&row, &REPLY_NUM).and_then(|t| extract_int(&t)),
        });
    }
    Some(rows)
}

/// 詳細ページを解析する。タイトルか本文がなければ `None`。
#[must_use]
pub fn parse_detail_page(
    html: &str,
    config: &GalleryConfig,
    row: &ListRow,
    detail_url: &str,
) -> Option<(Post, Vec<Comment>)> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title_node = first(&root, &TITLE_SUBJECT)?;
    let content_node = first(&root, &WRITE_DIV)?;

    let title = text_of(&title_node, "");
    let content = text_of(&content_node, "\n");
    let author = first_text(&root, &NICKNAME).or_else(|| row.writer.clone());
    let posted_at = first_text(&root, &POST_DATE)
        .and_then(|text| parse_detail_datetime(&text))
        .or(row.date);

    let mut meta = Meta::new();
    insert_opt(&mut meta, "views", first_text(&root, &POST_VIEWS).and_then(|t| extract_int(&t)));
    insert_opt(
        &mut meta,
        "recommendations",
        first_text(&root, &POST_RECOMMEND).and_then(|t| extract_int(&t)),
    );
    meta.insert("gallery_id".into(), Value::from(config.gallery_id.as_str()));
    meta.insert("page_url".into(), Value::from(detail_url));
    insert_opt(&mut meta, "list_writer", row.writer.clone());
    insert_opt(&mut meta, "writer_ip", row.writer_ip.clone());
    insert_opt(&mut meta, "writer_uid", row.writer_uid.clone());
    insert_opt(&mut meta, "list_date_text", row.date_text.clone());
    insert_opt(&mut meta, "list_views", row.views);
    insert_opt(&mut meta, "list_recommendations", row.recommendations);
    insert_opt(&mut meta, "list_comment_count", row.comment_count);

    let mut comments: Vec<Comment> = Vec::new();
    for node in document.select(&COMMENT_ITEMS) {
        let Some(block) = first(&node, &COMMENT_TEXT).or_else(|| first(&node, &COMMENT_REPLY))
        else {
            continue;
        };
        let text = text_of(&block, " ");
        if text.is_empty() {
            continue;
        }

        let author = first_text(&node, &NICKNAME)
            .or_else(|| first_text(&node, &COMMENT_NICK))
            .or_else(|| first_text(&node, &IP));
        let posted_at = first_text(&node, &COMMENT_DATE).and_then(|t| parse_detail_datetime(&t));

        let mut comment_meta = Meta::new();
        comment_meta.insert("post_id".into(), Value::from(row.post_id.as_str()));
        comment_meta.insert("gallery_id".into(), Value::from(config.gallery_id.as_str()));
        comment_meta.insert("gallery".into(), Value::from(config.label()));

        comments.push(Comment {
            site: SITE.to_string(),
            source_id: format!("{}_{}", row.post_id, comments.len() + 1),
            author,
            content: text,
            posted_at,
            meta: comment_meta,
        });
    }

    let post = Post {
        site: SITE.to_string(),
        gallery: config.label().to_string(),
        source_id: row.post_id.clone(),
        url: detail_url.to_string(),
        title,
        content,
        author,
        posted_at,
        comment_count: u32::try_from(comments.len()).unwrap_or(u32::MAX),
        meta,
        comments: Vec::new(),
    };
    Some((post, comments))
}

/// DCInside クローラー。
pub struct DcInsideCrawler<'a> {
    fetcher: &'a dyn PageFetcher,
}

impl<'a> DcInsideCrawler<'a> {
    #[must_use]
    pub fn new(fetcher: &'a dyn PageFetcher) -> Self {
        Self { fetcher }
    }

    /// ギャラリーを順にクロールする。
    pub async fn crawl(&self, galleries: &[GalleryConfig]) -> CrawlResult {
        let mut result = CrawlResult::default();
        for config in galleries {
            result.extend(self.crawl_gallery(config).await);
        }
        result
    }

    async fn crawl_gallery(&self, config: &GalleryConfig) -> CrawlResult {
        let mut result = CrawlResult::default();
        let mut seen: HashSet<String> = HashSet::new();
        let label = config.label();
        let progress = progress_bar(config.max_pages as usize, &format!("[DCInside {label}] page"));

        for page in page_range(config.start_page, config.max_pages) {
            let url = config.list_url(page);
            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => html,
                Err(error) => {
                    warn!(gallery = label, page, error = %error, "failed to fetch list page; skipping");
                    progress.inc(1);
                    continue;
                }
            };
            let Some(rows) = parse_list_page(&html, korea_now()) else {
                debug!(gallery = label, page, "no rows on list page; stopping");
                break;
            };

            for row in rows {
                if seen.contains(&row.post_id) {
                    continue;
                }
                let detail_url = format!("{BASE_URL}{}", row.href);
                let detail_html = match self.fetcher.fetch(&detail_url).await {
                    Ok(html) => html,
                    Err(error) => {
                        warn!(post_id = %row.post_id, error = %error, "failed to fetch post; skipping");
                        continue;
                    }
                };
                let Some((post, comments)) = parse_detail_page(&detail_html, config, &row, &detail_url)
                else {
                    continue;
                };

                if !config.in_range(post.posted_at.or(row.date)) {
                    continue;
                }

                seen.insert(row.post_id.clone());
                result.posts.push(post);
                if config.include_comments {
                    result.comments.extend(comments);
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        info!(
            gallery = label,
            posts = result.posts.len(),
            comments = result.comments.len(),
            "dcinside gallery crawled"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, s))
            .expect("valid datetime")
    }

    const LIST_HTML: &str = r#"
        <table class="gall_list"><tbody>
          <tr class="ub-content" data-type="icon_notice" data-no="1">
            <td class="gall_num">공지</td>
            <td class="gall_tit"><a href="/board/view/?id=test&no=1">공지사항</a></td>
          </tr>
          <tr class="ub-content" data-no="1001">
            <td class="gall_num">1001</td>
            <td class="gall_tit"><a href="/board/view/?id=test&no=1001">첫 글</a>
              <a class="reply_numbox"><span class="reply_num">[3]</span></a></td>
            <td class="gall_writer" data-uid="user1"><span class="nickname">닉네임</span><span class="ip">(1.2)</span></td>
            <td class="gall_date" title="2024-05-01 12:34:56">12:34</td>
            <td class="gall_count">1,024</td>
            <td class="gall_recommend">5</td>
          </tr>
          <tr class="ub-content">
            <td class="gall_num">AD</td>
            <td class="gall_tit"><a href="/board/view/?id=test&no=2">광고</a></td>
          </tr>
          <tr class="ub-content" data-no="1002">
            <td class="gall_num">1002</td>
            <td class="gall_tit"><a href="https://ad.example.com">외부</a></td>
          </tr>
        </tbody></table>
    "#;

    const DETAIL_HTML: &str = r#"
        <div class="gallview_head">
          <span class="title_subject">첫 글 제목</span>
          <span class="nickname">작성자</span>
          <span class="gall_date">2024.05.01 12:34:56</span>
          <span class="gall_count">조회 1024</span>
          <span class="gall_reply_num">추천 5</span>
        </div>
        <div class="write_div"><p>첫 줄</p><p> 둘째 줄 </p></div>
        <ul>
          <li class="ub-content"><span class="nickname">댓글러</span><p class="usertxt">ㅋㅋ 맞아</p><span class="date_time">2024.05.01 13:00:00</span></li>
          <li class="ub-content"><span class="ip">1.2.3.4</span><p class="usertxt">  </p></li>
          <li class="ub-content"><span class="nick">답글러</span><div class="reply-content">나도</div></li>
        </ul>
    "#;

    #[test]
    fn list_page_skips_notices_and_foreign_links() {
        let rows = parse_list_page(LIST_HTML, at(2024, 5, 1, 15, 0, 0)).expect("rows");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.post_id, "1001");
        assert_eq!(row.date, Some(at(2024, 5, 1, 12, 34, 56)));
        assert_eq!(row.writer.as_deref(), Some("닉네임"));
        assert_eq!(row.writer_uid.as_deref(), Some("user1"));
        assert_eq!(row.views, Some(1024));
        assert_eq!(row.comment_count, Some(3));
    }

    #[test]
    fn empty_list_page_stops_pagination() {
        assert!(parse_list_page("<table class='gall_list'><tbody></tbody></table>", korea_now()).is_none());
    }

    #[test]
    fn detail_page_builds_post_and_comments() {
        let rows = parse_list_page(LIST_HTML, at(2024, 5, 1, 15, 0, 0)).expect("rows");
        let config = GalleryConfig::new("test").with_name("테스트_갤러리");
        let (post, comments) =
            parse_detail_page(DETAIL_HTML, &config, &rows[0], "https://gall.dcinside.com/x")
                .expect("post");

        assert_eq!(post.title, "첫 글 제목");
        assert_eq!(post.content, "첫 줄\n둘째 줄");
        assert_eq!(post.author.as_deref(), Some("작성자"));
        assert_eq!(post.gallery, "테스트_갤러리");
        assert_eq!(post.meta["views"], Value::from(1024));
        assert_eq!(post.meta["list_comment_count"], Value::from(3));
        assert_eq!(post.comment_count, 2);

        assert_eq!(comments[0].source_id, "1001_1");
        assert_eq!(comments[0].content, "ㅋㅋ 맞아");
        assert_eq!(comments[0].posted_at, Some(at(2024, 5, 1, 13, 0, 0)));
        assert_eq!(comments[1].author.as_deref(), Some("답글러"));
        assert_eq!(comments[1].meta["gallery"], Value::from("테스트_갤러리"));
    }

    #[test]
    fn detail_without_body_is_skipped() {
        let rows = parse_list_page(LIST_HTML, korea_now()).expect("rows");
        let config = GalleryConfig::new("test");
        assert!(parse_detail_page("<span class='title_subject'>t</span>", &config, &rows[0], "u").is_none());
    }

    #[test]
    fn datetime_parsing_handles_short_years_and_clock_times() {
        let now = at(2024, 5, 2, 9, 0, 0);
        assert_eq!(parse_detail_datetime("24.05.01 10:11:12"), Some(at(2024, 5, 1, 10, 11, 12)));
        assert_eq!(parse_detail_datetime("2024.05.01"), Some(at(2024, 5, 1, 0, 0, 0)));
        assert_eq!(parse_list_datetime("2024/05/01 10:11:12", now), Some(at(2024, 5, 1, 10, 11, 12)));
        assert_eq!(parse_list_datetime("08:30", now), Some(at(2024, 5, 2, 8, 30, 0)));
        assert_eq!(parse_list_datetime("어제", now), None);
    }

    #[rstest]
    #[case("24.05.01", Some((2024, 5, 1, 0, 0, 0)))]
    #[case("24/05/01", Some((2024, 5, 1, 0, 0, 0)))]
    #[case("24.05.01 10:11:12", Some((2024, 5, 1, 10, 11, 12)))]
    #[case("2024-05-01 10:11:12", Some((2024, 5, 1, 10, 11, 12)))]
    #[case("05.01 10:11:12", None)]
    #[case("24-05-01", None)]
    fn list_datetime_short_forms(
        #[case] value: &str,
        #[case] expected: Option<(i32, u32, u32, u32, u32, u32)>,
    ) {
        let now = at(2024, 5, 2, 9, 0, 0);
        let expected = expected.map(|(y, m, d, h, min, s)| at(y, m, d, h, min, s));
        assert_eq!(parse_list_datetime(value, now), expected);
    }

    #[test]
    fn date_range_filters_posts() {
        let mut config = GalleryConfig::new("test");
        config.start_date = Some(at(2024, 5, 1, 0, 0, 0));
        config.end_date = Some(at(2024, 5, 31, 23, 59, 59));
        assert!(config.in_range(Some(at(2024, 5, 10, 0, 0, 0))));
        assert!(!config.in_range(Some(at(2024, 4, 30, 23, 0, 0))));
        assert!(config.in_range(None));
    }
}

//! 韓国のオンラインコミュニティ（DCInside・TheQoo・Instiz）のクローラー。
//!
//! ページ取得は [`PageFetcher`] に抽象化し、サイトごとのモジュールは取得したHTMLの解析だけを受け持つ。
//! 解析関数は同期的な純関数なので、取得済みのHTMLに対してそのままテストできる。

pub mod dcinside;
mod html;
pub mod http;
pub mod instiz;
pub mod storage;
pub mod theqoo;
pub mod webdriver;

use std::ops::Range;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::{Config, FetchMode};

pub use dcinside::{DcInsideCrawler, GalleryConfig};
pub use http::HttpFetcher;
pub use instiz::{InstizBoardConfig, InstizCrawler};
pub use theqoo::{TheQooBoardConfig, TheQooCrawler};
pub use webdriver::{WebDriverFetcher, WebDriverOptions};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },
    #[error("failed to parse {0}")]
    Parse(String),
}

/// URLからHTMLを取得する。
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;

    /// 取得に使ったリソース（ブラウザセッションなど）を解放する。
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 設定された方式のフェッチャーを作る。
///
/// # Errors
/// HTTPクライアントの構築、またはWebDriverセッションの作成に失敗した場合はエラーを返す。
pub async fn build_fetcher(config: &Config) -> Result<Box<dyn PageFetcher>> {
    match config.crawl_fetch_mode() {
        FetchMode::Http => Ok(Box::new(HttpFetcher::from_config(config)?)),
        FetchMode::WebDriver => {
            let fetcher = WebDriverFetcher::connect(WebDriverOptions::from_config(config)).await?;
            Ok(Box::new(fetcher))
        }
    }
}

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// 韓国標準時（UTC+9）のタイムゾーン。
pub(crate) fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// 韓国時間の現在時刻（壁時計）。
#[must_use]
pub fn korea_now() -> NaiveDateTime {
    Utc::now().with_timezone(&kst()).naive_local()
}

/// 文字列中のASCII数字をすべてつなげて整数にする。数字がなければ `None`。
#[must_use]
pub fn extract_int(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// `formats` を順に試して日時を読む。時刻を含まない書式は0時として扱う。
pub(crate) fn parse_with_formats(value: &str, formats: &[&str]) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    formats.iter().find_map(|format| {
        if format.contains("%H") {
            NaiveDateTime::parse_from_str(value, format).ok()
        } else {
            NaiveDate::parse_from_str(value, format)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        }
    })
}

/// 世紀が省略された年（`24.05.01` など）を2000年代に補正する。
pub(crate) fn fix_century(value: NaiveDateTime) -> NaiveDateTime {
    if value.year() < 2000 {
        value.with_year(value.year() + 2000).unwrap_or(value)
    } else {
        value
    }
}

/// `HH:MM` を `now` の日付の時刻として読む。
pub(crate) fn parse_clock_today(value: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .ok()
        .map(|time| now.date().and_time(time))
}

/// CLIの `--start-date` / `--end-date` を読む。
///
/// # Errors
/// どの書式にも合わない場合はエラーを返す。
pub fn parse_date_arg(value: &str) -> Result<NaiveDateTime, String> {
    parse_with_formats(
        value,
        &[
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d",
            "%Y.%m.%d",
            "%y.%m.%d",
        ],
    )
    .map(fix_century)
    .ok_or_else(|| format!("invalid date: {value} (expected YYYY-MM-DD)"))
}

/// 日付だけが指定された終了日をその日の終わりまで広げる。
#[must_use]
pub fn end_of_day(value: NaiveDateTime) -> NaiveDateTime {
    if value.time() == NaiveTime::MIN {
        value
            .date()
            .and_hms_opt(23, 59, 59)
            .unwrap_or(value)
    } else {
        value
    }
}

/// `start` から最大 `max_pages` ページ。`u32` の上限で打ち切る。
#[must_use]
pub fn page_range(start: u32, max_pages: u32) -> Range<u32> {
    start..start.saturating_add(max_pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn page_range_saturates_at_the_upper_bound() {
        assert_eq!(page_range(1, 3).collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(page_range(u32::MAX - 1, 10), (u32::MAX - 1)..u32::MAX);
        assert_eq!(page_range(u32::MAX, u32::MAX).count(), 0);
    }

    #[rstest]
    #[case("조회 1,234", Some(1234))]
    #[case("[12]", Some(12))]
    #[case("없음", None)]
    #[case("", None)]
    fn extracts_ascii_digits(#[case] text: &str, #[case] expected: Option<u64>) {
        assert_eq!(extract_int(text), expected);
    }

    #[test]
    fn date_arguments_accept_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("date");
        assert_eq!(parse_date_arg("2024-05-01"), Ok(expected));
        assert_eq!(parse_date_arg("2024.05.01"), Ok(expected));
        assert_eq!(parse_date_arg("24.05.01"), Ok(expected));
        assert!(parse_date_arg("yesterday").is_err());
    }

    #[test]
    fn end_of_day_only_extends_bare_dates() {
        let date = parse_date_arg("2024-05-01").expect("date");
        assert_eq!(end_of_day(date).format("%H:%M:%S").to_string(), "23:59:59");

        let with_time = parse_date_arg("2024-05-01 12:00:00").expect("datetime");
        assert_eq!(end_of_day(with_time), with_time);
    }

    #[test]
    fn clock_time_uses_today() {
        let now = parse_date_arg("2024-05-01 08:00:00").expect("now");
        let parsed = parse_clock_today("13:45", now).expect("clock");
        assert_eq!(parsed.to_string(), "2024-05-01 13:45:00");
    }
}

/// エラー分類とリトライ判定ユーティリティ。
use anyhow::Error;
use reqwest::StatusCode;

use crate::crawler::CrawlError;
use crate::tagger::TaggerError;

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// リトライ可能なエラー（一時的なネットワークエラー、タイムアウトなど）
    Retryable,
    /// リトライ不可能なエラー（404、パースエラーなど）
    NonRetryable,
    /// 致命的なエラー（APIキー不正など、続行しても意味がないもの）
    Fatal,
}

/// エラーを分類する。
#[must_use]
pub fn classify_error(error: &Error) -> ErrorKind {
    if let Some(tagger_err) = error.downcast_ref::<TaggerError>() {
        return match tagger_err {
            TaggerError::Unauthorized(_) => ErrorKind::Fatal,
            TaggerError::Status { status, .. } => classify_status(*status),
            TaggerError::Decode(_) => ErrorKind::NonRetryable,
        };
    }

    if let Some(crawl_err) = error.downcast_ref::<CrawlError>() {
        return match crawl_err {
            CrawlError::Request { source, .. } => classify_reqwest(source),
            CrawlError::Status { status, .. } => classify_status(*status),
            CrawlError::Parse(_) => ErrorKind::NonRetryable,
        };
    }

    if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
        return classify_reqwest(reqwest_err);
    }

    ErrorKind::NonRetryable
}

fn classify_reqwest(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() || error.is_connect() {
        return ErrorKind::Retryable;
    }
    error
        .status()
        .map_or(ErrorKind::NonRetryable, classify_status)
}

fn classify_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Fatal,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::Retryable,
        status if status.is_server_error() => ErrorKind::Retryable,
        _ => ErrorKind::NonRetryable,
    }
}

/// エラーがリトライ可能かどうかを判定する。
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Retryable)
}

/// エラーが致命的かどうかを判定する。
#[must_use]
pub fn is_fatal(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Fatal)
}

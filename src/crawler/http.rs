/// reqwestで直接HTMLを取得するフェッチャー。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, header};
use tokio::time::sleep;
use tracing::debug;

use super::{CrawlError, PageFetcher};
use crate::config::Config;
use crate::util::retry::{RetryConfig, retry_async};

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryConfig,
    delay: Duration,
}

impl HttpFetcher {
    /// 新しいフェッチャーを作成する。
    ///
    /// # Errors
    /// HTTPクライアントの構築に失敗した場合はエラーを返します。
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        delay: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"),
        );

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build crawler HTTP client")?;

        Ok(Self {
            client,
            retry,
            delay,
        })
    }

    /// 環境設定から作成する。
    ///
    /// # Errors
    /// HTTPクライアントの構築に失敗した場合はエラーを返します。
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.crawl_user_agent(),
            config.crawl_request_timeout(),
            config.crawl_delay(),
            config.retry_config(),
        )
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| CrawlError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status,
            }
            .into());
        }

        response
            .text()
            .await
            .map_err(|source| CrawlError::Request {
                url: url.to_string(),
                source,
            })
            .map_err(Into::into)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let html = retry_async(self.retry, "crawler.fetch", || self.fetch_once(url)).await?;
        debug!(url, bytes = html.len(), "fetched page");
        sleep(self.delay).await;
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::error::is_retryable;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(
            "eomi-test/1.0",
            Duration::from_secs(5),
            Duration::ZERO,
            RetryConfig::new(3, 1, 5),
        )
        .expect("fetcher")
    }

    #[tokio::test]
    async fn fetch_sends_user_agent_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/board/lists/"))
            .and(header("user-agent", "eomi-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let html = fetcher()
            .fetch(&format!("{}/board/lists/?id=test&page=1", server.uri()))
            .await
            .expect("fetch");
        assert_eq!(html, "<html>ok</html>");
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let error = fetcher()
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .expect_err("404 should fail");
        assert!(!is_retryable(&error));
        assert!(matches!(
            error.downcast_ref::<CrawlError>(),
            Some(CrawlError::Status { .. })
        ));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let html = fetcher()
            .fetch(&format!("{}/flaky", server.uri()))
            .await
            .expect("third attempt succeeds");
        assert_eq!(html, "recovered");
    }
}

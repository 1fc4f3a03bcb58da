/// chromedriver を W3C WebDriver プロトコル（HTTP+JSON）で操作するフェッチャー。
///
/// JavaScriptで描画されるページ向け。画像・フォントはCDPでブロックして転送量を減らす。
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::PageFetcher;
use crate::config::Config;

const BLOCKED_URL_PATTERNS: [&str; 8] = [
    "*.jpg", "*.jpeg", "*.png", "*.gif", "*.webp", "*.svg", "*.woff", "*.woff2",
];

/// WebDriverセッションの作成オプション。
#[derive(Debug, Clone)]
pub struct WebDriverOptions {
    pub endpoint: String,
    pub headless: bool,
    pub block_images: bool,
    pub user_agent: String,
    pub delay: Duration,
    pub request_timeout: Duration,
}

impl WebDriverOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.webdriver_url().to_string(),
            headless: config.webdriver_headless(),
            block_images: config.webdriver_block_images(),
            user_agent: config.crawl_user_agent().to_string(),
            delay: config.crawl_delay(),
            request_timeout: config.crawl_request_timeout(),
        }
    }

    /// Chromeに渡す起動引数。
    #[must_use]
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--user-agent={}", self.user_agent),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args
    }
}

/// WebDriverの応答は常に `{"value": ...}` で包まれる。
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    value: Value,
}

#[derive(Debug)]
pub struct WebDriverFetcher {
    client: Client,
    endpoint: String,
    session_id: Mutex<Option<String>>,
    delay: Duration,
}

impl WebDriverFetcher {
    /// セッションを作成し、必要なら画像のブロックを設定する。
    ///
    /// # Errors
    /// chromedriverに接続できない、またはセッション作成が拒否された場合はエラーを返す。
    pub async fn connect(options: WebDriverOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("failed to build webdriver HTTP client")?;
        let endpoint = options.endpoint.trim_end_matches('/').to_string();

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": options.chrome_args() }
                }
            }
        });
        let created = send(&client, Method::POST, &format!("{endpoint}/session"), Some(&capabilities))
            .await
            .context("failed to create webdriver session")?;
        let session_id = created
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("webdriver response is missing sessionId"))?
            .to_string();
        info!(session_id = %session_id, headless = options.headless, "webdriver session created");

        let fetcher = Self {
            client,
            endpoint,
            session_id: Mutex::new(Some(session_id)),
            delay: options.delay,
        };

        if options.block_images {
            fetcher
                .execute_cdp(
                    "Network.setBlockedURLs",
                    json!({ "urls": BLOCKED_URL_PATTERNS }),
                )
                .await?;
            fetcher.execute_cdp("Network.enable", json!({})).await?;
        }

        Ok(fetcher)
    }

    async fn session_url(&self, suffix: &str) -> Result<String> {
        let guard = self.session_id.lock().await;
        let session_id = guard
            .as_deref()
            .ok_or_else(|| anyhow!("webdriver session is already closed"))?;
        Ok(format!("{}/session/{session_id}{suffix}", self.endpoint))
    }

    async fn execute_cdp(&self, cmd: &str, params: Value) -> Result<Value> {
        let url = self.session_url("/goog/cdp/execute").await?;
        send(
            &self.client,
            Method::POST,
            &url,
            Some(&json!({ "cmd": cmd, "params": params })),
        )
        .await
        .with_context(|| format!("cdp command {cmd} failed"))
    }
}

async fn send(client: &Client, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("webdriver request to {url} failed"))?;

    let status = response.status();
    let envelope: Envelope = response
        .json()
        .await
        .with_context(|| format!("failed to decode webdriver response from {url}"))?;

    if !status.is_success() {
        let error = envelope
            .value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = envelope
            .value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(anyhow!("webdriver returned {status}: {error}: {message}"));
    }
    Ok(envelope.value)
}

#[async_trait]
impl PageFetcher for WebDriverFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let navigate = self.session_url("/url").await?;
        send(&self.client, Method::POST, &navigate, Some(&json!({ "url": url })))
            .await
            .with_context(|| format!("failed to navigate to {url}"))?;
        sleep(self.delay).await;

        let source_url = self.session_url("/source").await?;
        let source = send(&self.client, Method::GET, &source_url, None).await?;
        let html = source
            .as_str()
            .ok_or_else(|| anyhow!("page source for {url} is not a string"))?
            .to_string();
        debug!(url, bytes = html.len(), "fetched page via webdriver");
        Ok(html)
    }

    async fn close(&self) -> Result<()> {
        let Some(session_id) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        let url = format!("{}/session/{session_id}", self.endpoint);
        if let Err(error) = send(&self.client, Method::DELETE, &url, None).await {
            warn!(error = %error, session_id = %session_id, "failed to delete webdriver session");
            return Err(error);
        }
        info!(session_id = %session_id, "webdriver session closed");
        Ok(())
    }
}

use std::{
    env,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use thiserror::Error;

use crate::util::retry::RetryConfig;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    data_dir: PathBuf,
    bareun_api_key: Option<String>,
    bareun_base_url: String,
    bareun_connect_timeout: Duration,
    bareun_total_timeout: Duration,
    tag_max_concurrency: NonZeroUsize,
    http_max_retries: usize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
    crawl_delay: Duration,
    crawl_request_timeout: Duration,
    crawl_user_agent: String,
    crawl_fetch_mode: FetchMode,
    webdriver_url: String,
    webdriver_headless: bool,
    webdriver_block_images: bool,
    morph_save_interval: NonZeroUsize,
}

/// ページ取得の方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// reqwestで直接HTMLを取得する
    #[default]
    Http,
    /// chromedriver（W3C WebDriver）経由でレンダリング済みHTMLを取得する
    WebDriver,
}

impl FromStr for FetchMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "http" | "requests" => Ok(Self::Http),
            "webdriver" | "selenium" | "browser" => Ok(Self::WebDriver),
            other => Err(anyhow::anyhow!("unknown fetch mode: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から設定値を読み込み、検証する。
    ///
    /// `.env` が存在すれば先に読み込む（既存の環境変数は上書きしない）。
    /// `BAREUN_API_KEY` はタグ付けを行うコマンドでのみ必須なので、ここでは任意扱い。
    ///
    /// # Errors
    /// 数値・真偽値などのパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_process_env()
    }

    /// `.env` を読まずにプロセスの環境変数だけから設定を組み立てる。
    ///
    /// # Errors
    /// パースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_process_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(env::var("EOMI_DATA_DIR").unwrap_or_else(|_| "data".into()));

        // Bareun API settings
        let bareun_api_key = env::var("BAREUN_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let bareun_base_url =
            env::var("BAREUN_BASE_URL").unwrap_or_else(|_| "https://api.bareun.ai".to_string());
        let bareun_connect_timeout = parse_duration_ms("BAREUN_CONNECT_TIMEOUT_MS", 3000)?;
        let bareun_total_timeout = parse_duration_ms("BAREUN_TOTAL_TIMEOUT_MS", 30000)?;
        let tag_max_concurrency = parse_non_zero_usize("TAG_MAX_CONCURRENCY", 20)?;

        // Retry settings (exponential backoff + jitter)
        let http_max_retries = parse_usize("HTTP_MAX_RETRIES", 3)?;
        let http_backoff_base_ms = parse_u64("HTTP_BACKOFF_BASE_MS", 250)?;
        let http_backoff_cap_ms = parse_u64("HTTP_BACKOFF_CAP_MS", 10000)?;

        // Crawler settings
        let crawl_delay = parse_duration_ms("CRAWL_DELAY_MS", 500)?;
        let crawl_request_timeout = parse_duration_ms("CRAWL_REQUEST_TIMEOUT_MS", 20000)?;
        let crawl_user_agent =
            env::var("CRAWL_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
        let crawl_fetch_mode = parse_from_str("CRAWL_FETCH_MODE", FetchMode::Http)?;
        let webdriver_url =
            env::var("WEBDRIVER_URL").unwrap_or_else(|_| "http://localhost:9515".to_string());
        let webdriver_headless = parse_bool("WEBDRIVER_HEADLESS", true)?;
        let webdriver_block_images = parse_bool("WEBDRIVER_BLOCK_IMAGES", true)?;

        let morph_save_interval = parse_non_zero_usize("MORPH_SAVE_INTERVAL", 100)?;

        Ok(Self {
            data_dir,
            bareun_api_key,
            bareun_base_url,
            bareun_connect_timeout,
            bareun_total_timeout,
            tag_max_concurrency,
            http_max_retries,
            http_backoff_base_ms,
            http_backoff_cap_ms,
            crawl_delay,
            crawl_request_timeout,
            crawl_user_agent,
            crawl_fetch_mode,
            webdriver_url,
            webdriver_headless,
            webdriver_block_images,
            morph_save_interval,
        })
    }

    /// データディレクトリだけを差し替えたコピーを返す。
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    #[must_use]
    pub fn bareun_api_key(&self) -> Option<&str> {
        self.bareun_api_key.as_deref()
    }

    /// タグ付けに必要なAPIキーを返す。
    ///
    /// # Errors
    /// `BAREUN_API_KEY` が未設定の場合は [`ConfigError::Missing`] を返す。
    pub fn require_bareun_api_key(&self) -> Result<&str, ConfigError> {
        self.bareun_api_key()
            .ok_or(ConfigError::Missing("BAREUN_API_KEY"))
    }

    #[must_use]
    pub fn bareun_base_url(&self) -> &str {
        &self.bareun_base_url
    }

    #[must_use]
    pub fn bareun_connect_timeout(&self) -> Duration {
        self.bareun_connect_timeout
    }

    #[must_use]
    pub fn bareun_total_timeout(&self) -> Duration {
        self.bareun_total_timeout
    }

    #[must_use]
    pub fn tag_max_concurrency(&self) -> NonZeroUsize {
        self.tag_max_concurrency
    }

    #[must_use]
    pub fn http_max_retries(&self) -> usize {
        self.http_max_retries
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.http_max_retries,
            self.http_backoff_base_ms,
            self.http_backoff_cap_ms,
        )
    }

    #[must_use]
    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    #[must_use]
    pub fn crawl_request_timeout(&self) -> Duration {
        self.crawl_request_timeout
    }

    #[must_use]
    pub fn crawl_user_agent(&self) -> &str {
        &self.crawl_user_agent
    }

    #[must_use]
    pub fn crawl_fetch_mode(&self) -> FetchMode {
        self.crawl_fetch_mode
    }

    #[must_use]
    pub fn webdriver_url(&self) -> &str {
        &self.webdriver_url
    }

    #[must_use]
    pub fn webdriver_headless(&self) -> bool {
        self.webdriver_headless
    }

    #[must_use]
    pub fn webdriver_block_images(&self) -> bool {
        self.webdriver_block_images
    }

    #[must_use]
    pub fn morph_save_interval(&self) -> NonZeroUsize {
        self.morph_save_interval
    }
}

/// データディレクトリ配下の各ステージの入出力先。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    #[must_use]
    pub fn preprocessed_dir(&self) -> PathBuf {
        self.root.join("preprocessed")
    }

    #[must_use]
    pub fn tagged_dir(&self) -> PathBuf {
        self.root.join("processed").join("tagged")
    }

    #[must_use]
    pub fn morph_dir(&self) -> PathBuf {
        self.root.join("processed").join("morph")
    }

    #[must_use]
    pub fn expanded_dir(&self) -> PathBuf {
        self.root.join("processed").join("expanded")
    }

    #[must_use]
    pub fn intent_dir(&self) -> PathBuf {
        self.root.join("processed").join("intent")
    }

    #[must_use]
    pub fn review_dir(&self) -> PathBuf {
        self.root.join("review")
    }

    #[must_use]
    pub fn analysis_dir(&self) -> PathBuf {
        self.root.join("analysis")
    }
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}

fn parse_from_str<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = anyhow::Error>,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|source| ConfigError::Invalid { name, source }),
        Err(_) => Ok(default),
    }
}

use std::str::FromStr;

use anyhow::{Error, Result};
use once_cell::sync::OnceCell;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// ログの出力形式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 端末向けのコンパクトな形式
    #[default]
    Pretty,
    /// 1行1JSONの構造化ログ
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" | "compact" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::msg(format!("unknown log format: {other}"))),
        }
    }
}

/// Tracing サブスクライバを一度だけ初期化する。
///
/// フィルタは `RUST_LOG`（未設定なら `default_directive`）。
/// `LOG_FORMAT=json` が設定されていれば引数より優先してJSON形式にする。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init(default_directive: &str, format: LogFormat) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive))
            // reqwest/hyper の接続ログは冗長なので抑える
            .add_directive("hyper=warn".parse()?)
            .add_directive("reqwest=warn".parse()?)
            .add_directive("html5ever=error".parse()?);

        let format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(format);

        let registry = tracing_subscriber::registry().with(env_filter);
        let initialized = match format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .json(),
                )
                .try_init(),
            LogFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init(),
        };
        initialized
            .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;

        debug!(?format, "tracing initialized");
        Ok::<(), Error>(())
    })?;
    Ok(())
}

/// パニックを `tracing::error!` で記録するフックを登録する。
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));
}

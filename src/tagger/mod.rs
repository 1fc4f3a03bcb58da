//! 形態素解析器の抽象化。
//!
//! 実運用は [`bareun::BareunClient`]（外部API）を使い、テストでは固定結果を返す実装に差し替える。

pub mod bareun;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bareun::{BareunClient, BareunConfig};

/// 形態素1つ分の解析結果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Morpheme {
    pub text: String,
    pub tag: String,
    #[serde(default)]
    pub probability: f64,
    #[serde(default)]
    pub oov: bool,
}

impl Morpheme {
    #[must_use]
    pub fn new(text: impl Into<String>, tag: impl Into<String>, probability: f64) -> Self {
        Self {
            text: text.into(),
            tag: tag.into(),
            probability,
            oov: false,
        }
    }

    #[must_use]
    pub fn with_oov(mut self, oov: bool) -> Self {
        self.oov = oov;
        self
    }

    /// 助詞（J*）かどうか。
    #[must_use]
    pub fn is_josa(&self) -> bool {
        self.tag.starts_with('J')
    }

    /// 記号（S*）かどうか。
    #[must_use]
    pub fn is_symbol(&self) -> bool {
        self.tag.starts_with('S')
    }
}

#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("tagger rejected credentials ({0})")]
    Unauthorized(StatusCode),
    #[error("tagger returned error status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode tagger response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// テキストを形態素列に変換する解析器。
#[async_trait]
pub trait MorphTagger: Send + Sync {
    /// テキストを解析し、全文の形態素を出現順に返す。空白のみのテキストは空を返す。
    async fn analyze(&self, text: &str) -> anyhow::Result<Vec<Morpheme>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morpheme_serializes_as_named_fields() {
        let morph = Morpheme::new("다", "EF", 0.98).with_oov(true);
        let json = serde_json::to_string(&morph).expect("serialize");
        assert_eq!(json, r#"{"text":"다","tag":"EF","probability":0.98,"oov":true}"#);
    }

    #[test]
    fn morpheme_defaults_missing_probability() {
        let morph: Morpheme = serde_json::from_str(r#"{"text":".","tag":"SF"}"#).expect("parse");
        assert!(morph.is_symbol());
        assert!(morph.probability.abs() < f64::EPSILON);
        assert!(!morph.oov);
    }
}

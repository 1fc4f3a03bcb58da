/// Bareun 形態素解析APIクライアント。
///
/// `POST /bareun/api/v1/analyze` を呼び、文 → 語節 → 形態素の階層を平坦化して返します。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{MorphTagger, Morpheme, TaggerError};
use crate::config::Config;
use crate::util::retry::{RetryConfig, retry_async};

const ANALYZE_PATH: &str = "bareun/api/v1/analyze";
const OUT_OF_VOCAB: &str = "OUT_OF_VOCAB";

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    document: Document<'a>,
    encoding_type: &'static str,
    auto_split_sentence: bool,
    auto_spacing: bool,
}

#[derive(Debug, Serialize)]
struct Document<'a> {
    content: &'a str,
    language: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    sentences: Vec<SentenceResponse>,
}

#[derive(Debug, Deserialize)]
struct SentenceResponse {
    #[serde(default)]
    tokens: Vec<TokenResponse>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    morphemes: Vec<MorphemeResponse>,
}

#[derive(Debug, Deserialize)]
struct MorphemeResponse {
    text: TextSpan,
    #[serde(default)]
    tag: Value,
    #[serde(default)]
    probability: f64,
    #[serde(default, rename = "outOfVocab", alias = "out_of_vocab")]
    out_of_vocab: Value,
}

#[derive(Debug, Deserialize)]
struct TextSpan {
    #[serde(default)]
    content: String,
}

impl MorphemeResponse {
    fn into_morpheme(self) -> Morpheme {
        Morpheme::new(self.text.content, value_to_name(&self.tag), self.probability)
            .with_oov(is_out_of_vocab(&self.out_of_vocab))
    }
}

/// enum値は名前でも番号でも返ってくるので文字列にそろえる。
fn value_to_name(value: &Value) -> String {
    match value {
        Value::String(name) => name.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `OUT_OF_VOCAB` (1) だけを未登録語とみなす。辞書由来の値 (2, 3) は登録語。
fn is_out_of_vocab(value: &Value) -> bool {
    match value {
        Value::String(name) => name == OUT_OF_VOCAB || name == "1",
        Value::Number(number) => number.as_i64() == Some(1),
        Value::Bool(flag) => *flag,
        _ => false,
    }
}

/// Bareunクライアントの設定。
#[derive(Debug, Clone)]
pub struct BareunConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    pub retry: RetryConfig,
}

impl BareunConfig {
    /// 環境設定からクライアント設定を作る。
    ///
    /// # Errors
    /// `BAREUN_API_KEY` が未設定の場合はエラーを返す。
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_bareun_api_key()?.to_string();
        Ok(Self {
            base_url: config.bareun_base_url().to_string(),
            api_key,
            connect_timeout: config.bareun_connect_timeout(),
            total_timeout: config.bareun_total_timeout(),
            retry: config.retry_config(),
        })
    }
}

/// Bareun REST APIとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub struct BareunClient {
    client: Client,
    analyze_url: Url,
    api_key: String,
    retry: RetryConfig,
}

impl BareunClient {
    /// 新しいBareunクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub fn new(config: BareunConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build bareun HTTP client")?;

        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let analyze_url = Url::parse(&base)
            .and_then(|url| url.join(ANALYZE_PATH))
            .context("invalid bareun base URL")?;

        Ok(Self {
            client,
            analyze_url,
            api_key: config.api_key,
            retry: config.retry,
        })
    }

    async fn analyze_once(&self, text: &str) -> Result<Vec<Morpheme>> {
        let body = AnalyzeRequest {
            document: Document {
                content: text,
                language: "ko_KR",
            },
            encoding_type: "UTF32",
            auto_split_sentence: true,
            auto_spacing: true,
        };

        let response = self
            .client
            .post(self.analyze_url.clone())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("bareun analyze request failed")?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TaggerError::Unauthorized(status).into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaggerError::Status { status, body }.into());
        }

        let raw = response
            .bytes()
            .await
            .context("failed to read bareun response body")?;
        let parsed: AnalyzeResponse =
            serde_json::from_slice(&raw).map_err(TaggerError::Decode)?;

        let morphemes: Vec<Morpheme> = parsed
            .sentences
            .into_iter()
            .flat_map(|sentence| sentence.tokens)
            .flat_map(|token| token.morphemes)
            .map(MorphemeResponse::into_morpheme)
            .collect();

        debug!(chars = text.chars().count(), morphemes = morphemes.len(), "bareun analyzed text");
        Ok(morphemes)
    }
}

#[async_trait]
impl MorphTagger for BareunClient {
    async fn analyze(&self, text: &str) -> Result<Vec<Morpheme>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        retry_async(self.retry, "bareun.analyze", || self.analyze_once(text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::error::is_fatal;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> BareunConfig {
        BareunConfig {
            base_url,
            api_key: "koba-test".to_string(),
            connect_timeout: Duration::from_secs(3),
            total_timeout: Duration::from_secs(10),
            retry: RetryConfig::new(3, 1, 5),
        }
    }

    fn analyze_body() -> Value {
        json!({
            "sentences": [{
                "text": {"content": "밥 먹었다", "beginOffset": 0},
                "tokens": [
                    {"morphemes": [
                        {"text": {"content": "밥", "beginOffset": 0}, "tag": "NNG", "probability": 0.99, "outOfVocab": "IN_WORD_EMBEDDING"}
                    ]},
                    {"morphemes": [
                        {"text": {"content": "먹", "beginOffset": 2}, "tag": "VV", "probability": 0.97},
                        {"text": {"content": "었", "beginOffset": 3}, "tag": "EP", "probability": 0.95, "outOfVocab": 0},
                        {"text": {"content": "다", "beginOffset": 4}, "tag": "EF", "probability": 0.91, "outOfVocab": "IN_WORD_EMBEDDING"}
                    ]}
                ]
            }, {
                "tokens": [
                    {"morphemes": [
                        {"text": {"content": "긔", "beginOffset": 6}, "tag": "EF", "probability": 0.42, "outOfVocab": "OUT_OF_VOCAB"}
                    ]}
                ]
            }]
        })
    }

    #[tokio::test]
    async fn analyze_flattens_sentences_and_tokens() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bareun/api/v1/analyze"))
            .and(header("api-key", "koba-test"))
            .and(body_json(json!({
                "document": {"content": "밥 먹었다 긔", "language": "ko_KR"},
                "encoding_type": "UTF32",
                "auto_split_sentence": true,
                "auto_spacing": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(analyze_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = BareunClient::new(test_config(server.uri())).expect("client");
        let morphemes = client.analyze("밥 먹었다 긔").await.expect("analyze");

        let tags: Vec<&str> = morphemes.iter().map(|m| m.tag.as_str()).collect();
        assert_eq!(tags, ["NNG", "VV", "EP", "EF", "EF"]);
        assert!(!morphemes[0].oov);
        assert!(!morphemes[1].oov);
        assert!(!morphemes[2].oov);
        assert!(morphemes[4].oov);
        assert_eq!(morphemes[4].text, "긔");
    }

    #[tokio::test]
    async fn blank_text_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(analyze_body()))
            .expect(0)
            .mount(&server)
            .await;

        let client = BareunClient::new(test_config(server.uri())).expect("client");
        assert!(client.analyze("   ").await.expect("blank").is_empty());
    }

    #[tokio::test]
    async fn unauthorized_is_fatal_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bareun/api/v1/analyze"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = BareunClient::new(test_config(server.uri())).expect("client");
        let error = client.analyze("안녕").await.expect_err("should fail");
        assert!(is_fatal(&error));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bareun/api/v1/analyze"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bareun/api/v1/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(analyze_body()))
            .mount(&server)
            .await;

        let client = BareunClient::new(test_config(server.uri())).expect("client");
        let morphemes = client.analyze("밥 먹었다").await.expect("retry succeeds");
        assert_eq!(morphemes.len(), 5);
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let client = BareunClient::new(test_config(server.uri())).expect("client");
        let error = client.analyze("안녕").await.expect_err("decode fails");
        assert!(matches!(
            error.downcast_ref::<TaggerError>(),
            Some(TaggerError::Decode(_))
        ));
    }

    #[rstest]
    #[case(json!(1), true)]
    #[case(json!("OUT_OF_VOCAB"), true)]
    #[case(json!(0), false)]
    #[case(json!(2), false)]
    #[case(json!(3), false)]
    #[case(json!("IN_WORD_EMBEDDING"), false)]
    #[case(json!("IN_CUSTOM_DICTIONARY"), false)]
    #[case(Value::Null, false)]
    fn only_out_of_vocab_value_counts_as_oov(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(is_out_of_vocab(&value), expected);
    }
}

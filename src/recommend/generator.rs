//! Recommendation reason generation.
//!
//! [`ReasonGenerator`] is the seam the orchestrator calls for every cache
//! miss. [`ChatReasonGenerator`] implements it against an OpenAI-compatible
//! `/chat/completions` endpoint and answers from a fixed table of canned
//! reasons when no API key is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{EdgeError, Result};

/// Produces the explanation shown next to a recommended menu.
#[async_trait]
pub trait ReasonGenerator: Send + Sync {
    /// Generator name for logging/debugging.
    fn name(&self) -> &str;

    /// Explain why `candidate` suits someone feeling `mood`.
    ///
    /// Implementations should return [`EdgeError::EmptyResponse`] rather than
    /// an empty string.
    async fn generate_reason(&self, mood: &str, keywords: &[String], candidate: &str)
    -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

const CANNED_REASONS: &[(&str, &str)] = &[
    (
        "된장찌개",
        "지친 하루 끝에 따뜻한 국물 한 숟갈은 마음까지 녹여줄 거예요. 엄마가 끓여주신 것 같은 그 맛이 오늘 당신에게 필요한 위로예요.",
    ),
    (
        "칼국수",
        "따끈한 면발이 속을 편하게 해줄 거예요. 한 그릇 비우고 나면 마음도 한결 가벼워질 거예요.",
    ),
    (
        "김치찌개",
        "칼칼한 국물이 정신을 번쩍 들게 해줄 거예요. 밥 한 공기 뚝딱 비우고 나면 활력이 생길 거예요.",
    ),
    (
        "삼겹살",
        "고기 한 점의 행복이 오늘 하루의 피로를 날려줄 거예요. 스스로에게 주는 작은 선물이에요.",
    ),
    (
        "냉면",
        "시원한 육수가 복잡한 머리를 말끔하게 정리해줄 거예요. 청량한 한 그릇이 당신의 기분을 상쾌하게 바꿔줄 거예요.",
    ),
];

/// Reason generator backed by an OpenAI-compatible chat completions API.
///
/// # Example
///
/// ```rust
/// # use ojeomneo_edge::recommend::ChatReasonGenerator;
/// let generator = ChatReasonGenerator::new(None::<String>, "gpt-4o-mini");
/// assert!(!generator.is_available());
/// ```
pub struct ChatReasonGenerator {
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    http_client: reqwest::Client,
}

impl ChatReasonGenerator {
    /// Create a generator. Without an API key every call returns a canned reason.
    pub fn new(api_key: Option<impl Into<String>>, model: impl Into<String>) -> Self {
        Self::with_http_client(api_key, model, reqwest::Client::new())
    }

    /// Create a generator sharing an existing HTTP client.
    pub fn with_http_client(
        api_key: Option<impl Into<String>>,
        model: impl Into<String>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            api_key: api_key.map(Into::into).filter(|k: &String| !k.is_empty()),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 200,
            temperature: 0.8,
            http_client,
        }
    }

    /// Override the API base URL (no trailing slash).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Whether calls go to the remote API.
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// The canned reason used when no API key is configured.
    pub fn canned_reason(candidate: &str) -> String {
        CANNED_REASONS
            .iter()
            .find(|(name, _)| *name == candidate)
            .map(|(_, reason)| reason.to_string())
            .unwrap_or_else(|| {
                format!("{candidate} 한 그릇이 오늘 당신에게 딱 맞는 선택이에요. 맛있게 드시고 힘내세요!")
            })
    }

    fn prompt(mood: &str, keywords: &[String], candidate: &str) -> String {
        format!(
            "감정: {mood}\n키워드: {}\n\n위 상태의 사람에게 어울리는 음식으로 \"{candidate}\"을 추천합니다.\n\
             왜 이 음식이 어울리는지 2문장 이내로 따뜻하고 공감가는 문체로 설명해주세요.\n\
             설명만 출력하고 다른 텍스트는 포함하지 마세요.",
            keywords.join(", ")
        )
    }
}

#[async_trait]
impl ReasonGenerator for ChatReasonGenerator {
    fn name(&self) -> &str {
        "chat"
    }

    #[instrument(name = "reason.generate", skip(self, keywords), fields(model = %self.model))]
    async fn generate_reason(
        &self,
        mood: &str,
        keywords: &[String],
        candidate: &str,
    ) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(Self::canned_reason(candidate));
        };

        let prompt = Self::prompt(mood, keywords, candidate);
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EdgeError::Api {
                status: response.status().as_u16(),
                message: response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".into()),
            });
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(EdgeError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_means_unavailable() {
        assert!(!ChatReasonGenerator::new(Some(""), "m").is_available());
        assert!(ChatReasonGenerator::new(Some("sk-test"), "m").is_available());
    }

    #[test]
    fn canned_reason_known_and_default() {
        assert!(ChatReasonGenerator::canned_reason("냉면").starts_with("시원한 육수"));
        assert_eq!(
            ChatReasonGenerator::canned_reason("비빔밥"),
            "비빔밥 한 그릇이 오늘 당신에게 딱 맞는 선택이에요. 맛있게 드시고 힘내세요!"
        );
    }

    #[test]
    fn prompt_mentions_inputs() {
        let prompt = ChatReasonGenerator::prompt(
            "피곤함",
            &["따뜻한".to_string(), "국물".to_string()],
            "김치찌개",
        );
        assert!(prompt.contains("감정: 피곤함"));
        assert!(prompt.contains("키워드: 따뜻한, 국물"));
        assert!(prompt.contains("\"김치찌개\""));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let generator = ChatReasonGenerator::new(None::<String>, "m").base_url("http://x/v1/");
        assert_eq!(generator.base_url, "http://x/v1");
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GenerationConfig;
use crate::error::GenerateError;
use crate::quiz::controller::QuizSource;
use crate::quiz::normalize::normalize;
use crate::quiz::QuizItem;

/// What a caller asks the orchestrator for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizRequest {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub era: Option<String>,
}

impl QuizRequest {
    pub fn new(keyword: impl Into<String>, era: Option<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            era,
        }
    }

    fn keyword(&self) -> Result<&str, GenerateError> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(GenerateError::InvalidRequest("keyword is required"))
    }

    fn era(&self) -> Option<&str> {
        self.era.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

/// Builds prompts, talks to the text-generation backend and hands the text to
/// the normalizer. One outbound call per request; retrying is up to the
/// session controller.
pub struct QuizHelper {
    http: reqwest::Client,
    config: GenerationConfig,
}

impl QuizHelper {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Raw model text for the request, before any normalization.
    pub async fn generate_raw(&self, request: &QuizRequest) -> Result<String, GenerateError> {
        let keyword = request.keyword()?;
        let prompt = build_prompt(keyword, request.era());

        log::info!("Requesting quiz for keyword {:?}", keyword);
        let payload = GenerateContentRequest::new(
            &prompt,
            self.config.temperature,
            self.config.max_output_tokens,
        );
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("x-goog-api-key", self.config.api_key.as_str())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            log::error!("Generation backend answered {}: {}", status, detail);
            return Err(GenerateError::Upstream {
                status: status.as_u16(),
                detail,
            });
        }

        let envelope: Value = response.json().await?;
        let text = extract_text(&envelope)
            .ok_or_else(|| GenerateError::UpstreamEmptyResponse {
                raw: envelope.clone(),
            })?;

        log::debug!("Completion: {:?}", text);
        Ok(text)
    }

    pub async fn generate_quiz(&self, request: &QuizRequest) -> Result<QuizItem, GenerateError> {
        let text = self.generate_raw(request).await?;
        normalize(&text).map_err(|e| {
            log::warn!("Could not normalize completion: {}", e);
            GenerateError::from(e)
        })
    }
}

#[async_trait]
impl QuizSource for QuizHelper {
    async fn fetch_quiz(&self, keyword: &str, era: Option<&str>) -> Result<QuizItem, GenerateError> {
        let request = QuizRequest::new(keyword, era.map(str::to_string));
        self.generate_quiz(&request).await
    }
}

pub fn build_prompt(keyword: &str, era: Option<&str>) -> String {
    let era_line = era
        .map(|era| format!("時代は「{}」です。\n", era))
        .unwrap_or_default();

    format!(
        "中学生向けの歴史クイズを作ってください。
{}正解は「{}」です。
問題文と3つの選択肢、解説を次のJSON形式だけで返してください。
正解の選択肢は必ず1つだけにしてください。
説明文やマークダウンのコードブロック（```）は付けないでください。
フォーマット例:
{{
  \"question\": \"問題文\",
  \"answerOptions\": [
    {{\"text\":\"選択肢1\",\"isCorrect\":false,\"rationale\":\"不正解の理由\"}},
    {{\"text\":\"選択肢2\",\"isCorrect\":true,\"rationale\":\"正解の理由\"}},
    {{\"text\":\"選択肢3\",\"isCorrect\":false,\"rationale\":\"不正解の理由\"}}
  ],
  \"keyword_explanation\": \"キーワードの解説\"
}}",
        era_line, keyword
    )
}

/// `candidates[0].content.parts[0].text`, if present and not blank.
fn extract_text(envelope: &Value) -> Option<String> {
    let response: GenerateContentResponse = serde_json::from_value(envelope.clone()).ok()?;
    response
        .candidates?
        .into_iter()
        .next()?
        .content?
        .parts?
        .into_iter()
        .next()?
        .text
        .filter(|text| !text.trim().is_empty())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationParams,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    max_output_tokens: u32,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(prompt: &'a str, temperature: f32, max_output_tokens: u32) -> Self {
        Self {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationParams {
                temperature,
                max_output_tokens,
            },
        }
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

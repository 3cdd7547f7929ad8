use std::time::Duration;

use async_trait::async_trait;

use super::ai_helper::QuizRequest;
use super::controller::QuizSource;
use super::normalize::normalize;
use super::QuizItem;
use crate::error::GenerateError;

/// Client side of `POST /api/generate`.
///
/// Whatever the server answers is normalized again here; older servers pass
/// the model output through untouched.
pub struct HttpQuizSource {
    http: reqwest::Client,
    url: String,
}

impl HttpQuizSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl QuizSource for HttpQuizSource {
    async fn fetch_quiz(&self, keyword: &str, era: Option<&str>) -> Result<QuizItem, GenerateError> {
        let request = QuizRequest::new(keyword, era.map(str::to_string));
        let response = self.http.post(&self.url).json(&request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GenerateError::Upstream {
                status: status.as_u16(),
                detail: body,
            });
        }

        Ok(normalize(&body)?)
    }
}

//! `POST /api/generate`: one keyword in, one normalized quiz out.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::GenerateError;
use crate::quiz::ai_helper::{QuizHelper, QuizRequest};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            raw: None,
        }
    }

    fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

pub fn router(helper: Arc<QuizHelper>) -> Router {
    Router::new()
        .route(
            "/api/generate",
            post(handle_generate).fallback(handle_method_not_allowed),
        )
        .with_state(helper)
}

async fn handle_generate(
    State(helper): State<Arc<QuizHelper>>,
    payload: Result<Json<QuizRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            log::warn!("Rejected generate request: {}", rejection);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new("keyword is required")),
            )
                .into_response();
        }
    };

    match helper.generate_quiz(&request).await {
        Ok(quiz) => (StatusCode::OK, Json(quiz)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_method_not_allowed() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorBody::new("Method not allowed")),
    )
}

fn error_response(error: GenerateError) -> Response {
    let (status, body) = match error {
        GenerateError::InvalidRequest(message) => {
            (StatusCode::BAD_REQUEST, ErrorBody::new(message))
        }
        GenerateError::UpstreamEmptyResponse { raw } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::new("No text response from Gemini API").with_raw(raw),
        ),
        GenerateError::MalformedResponse(e) => {
            let raw = Value::String(e.raw().to_string());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new(format!("Invalid JSON from Gemini: {}", e)).with_raw(raw),
            )
        }
        GenerateError::Upstream { status, detail } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::new(format!("Gemini API request failed with status {}", status))
                .with_raw(json!({ "status": status, "body": detail })),
        ),
        other @ (GenerateError::Network(_) | GenerateError::Timeout(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new(other.to_string()))
        }
    };

    if status.is_server_error() {
        log::error!("Quiz generation failed: {}", body.error);
    }
    (status, Json(body)).into_response()
}

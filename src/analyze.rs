use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::Config;
use crate::models::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentPart, ImageUrl,
};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "image-analysis-api/1.0";
pub const UPLOAD_FIELD: &str = "file";
pub const INSTRUCTION: &str = "Extract any text from this image and describe the overall meaning or content of the image. Be minimal.";
pub const MAX_TOKENS: u32 = 500;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Error analyzing image: {0}")]
    Upstream(String),
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Finds the `file` part of the form and runs it through the vision model.
/// Parts with any other name are skipped.
pub async fn analyze_upload(
    client: &VisionClient,
    mut multipart: Multipart,
) -> Result<String, AnalysisError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        return analyze_field(client, field).await;
    }
    Err(AnalysisError::InvalidInput(format!(
        "Field required: {}",
        UPLOAD_FIELD
    )))
}

async fn analyze_field(client: &VisionClient, field: Field<'_>) -> Result<String, AnalysisError> {
    // Content type is checked before any of the body is read.
    let content_type = validate_content_type(field.content_type())?.to_string();
    let file_name = field.file_name().map(str::to_owned);

    let bytes = field.bytes().await.map_err(multipart_error)?;

    tracing::debug!(
        file_name = file_name.as_deref().unwrap_or("<unnamed>"),
        content_type = %content_type,
        size = bytes.len(),
        "received upload"
    );

    let data_url = build_data_url(&content_type, &bytes);
    client.describe(data_url).await
}

// A malformed form is the caller's fault; anything else (body limit hit,
// connection dropped mid-stream) is a failure reading the upload.
fn multipart_error(e: MultipartError) -> AnalysisError {
    if e.status() == StatusCode::BAD_REQUEST {
        AnalysisError::InvalidInput(e.body_text())
    } else {
        AnalysisError::Upstream(e.body_text())
    }
}

// ── Upload validation ────────────────────────────────────────────────────────

pub fn validate_content_type(content_type: Option<&str>) -> Result<&str, AnalysisError> {
    match content_type {
        Some(ct) if ct.starts_with("image/") => Ok(ct),
        _ => Err(AnalysisError::InvalidInput(
            "File must be an image".to_string(),
        )),
    }
}

pub fn build_data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(bytes))
}

// ── Vision client ────────────────────────────────────────────────────────────

/// Immutable handle on the hosted model, shared by every request.
pub struct VisionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl VisionClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::ClientBuilder::new()
            .user_agent(USER_AGENT)
            .build()?;

        Ok(VisionClient {
            http,
            endpoint: format!("{}/chat/completions", config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn describe(&self, data_url: String) -> Result<String, AnalysisError> {
        let request = build_request(&self.model, data_url);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Upstream(format!("TimeoutError: {}", e))
                } else if e.is_connect() {
                    AnalysisError::Upstream(format!("ConnectError: {}", e))
                } else {
                    AnalysisError::Upstream(format!("RequestError: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream(format!(
                "Error code: {} - {}",
                status.as_u16(),
                body
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Upstream(e.to_string()))?;

        first_choice_text(completion)
    }
}

fn build_request(model: &str, data_url: String) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text {
                    text: INSTRUCTION.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ],
        }],
        max_tokens: MAX_TOKENS,
    }
}

fn first_choice_text(completion: ChatCompletionResponse) -> Result<String, AnalysisError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AnalysisError::Upstream("No completion choices returned".to_string()))?;
    choice
        .message
        .content
        .ok_or_else(|| AnalysisError::Upstream("Completion contained no text".to_string()))
}

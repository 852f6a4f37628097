use crate::http::build_client;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("GEMINI_API_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            api_key: std::env::var("GEMINI_API_KEY").ok(),
            model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash-001".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("model returned no text")]
    EmptyResponse,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Per-stage generation knobs. Identification and pricing run cold for
/// determinism; suggestion prompts run warmer. Token budgets stay small.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: &'static str,
    pub data_base64: String,
}

impl InlineImage {
    /// The upstream contract keys MIME off the filename: `.png` is image/png,
    /// anything else is treated as JPEG.
    pub fn from_bytes(filename: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_for_filename(filename),
            data_base64: BASE64.encode(bytes),
        }
    }
}

pub fn mime_for_filename(filename: &str) -> &'static str {
    if filename.to_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(GeminiConfig::from_env())
    }

    /// Sends one prompt (optionally with an inlined image) and returns the raw
    /// reply text. Timeouts ride on the shared HTTP client.
    pub async fn generate(
        &self,
        prompt: &str,
        image: Option<&InlineImage>,
        params: GenerationParams,
    ) -> Result<String, LlmError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model,
        );
        let body = request_body(prompt, image, params);

        let response = self
            .http
            .post(url)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

fn request_body(
    prompt: &str,
    image: Option<&InlineImage>,
    params: GenerationParams,
) -> GenerateContentRequest {
    let mut parts = vec![RequestPart {
        text: Some(prompt.to_string()),
        inline_data: None,
    }];
    if let Some(image) = image {
        parts.push(RequestPart {
            text: None,
            inline_data: Some(InlineData {
                mime_type: image.mime_type.to_string(),
                data: image.data_base64.clone(),
            }),
        });
    }
    GenerateContentRequest {
        contents: vec![RequestContent {
            role: "user",
            parts,
        }],
        generation_config: RequestGenerationConfig {
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: RequestGenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_detection_follows_filename() {
        assert_eq!(mime_for_filename("photo.PNG"), "image/png");
        assert_eq!(mime_for_filename("photo.jpg"), "image/jpeg");
        assert_eq!(mime_for_filename("upload"), "image/jpeg");
    }

    #[test]
    fn request_body_inlines_image() {
        let image = InlineImage::from_bytes("shelf.png", b"\x89PNG");
        let body = request_body(
            "identify this",
            Some(&image),
            GenerationParams {
                temperature: 0.2,
                max_output_tokens: 1024,
            },
        );
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "identify this");
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[tokio::test]
    async fn missing_api_key_fails_fast() {
        let client = GeminiClient::new(GeminiConfig {
            api_url: "https://example.invalid".into(),
            api_key: None,
            model: "gemini-2.0-flash-001".into(),
        });
        let err = client
            .generate(
                "hello",
                None,
                GenerationParams {
                    temperature: 0.1,
                    max_output_tokens: 64,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
    }
}

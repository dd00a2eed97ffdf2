//! Upstream image-generation provider clients.
//!
//! Two providers are supported: Google's Gemini image models (including the
//! Imagen `:predict` endpoint) and OpenAI's images API. Both return raw
//! image bytes or a [`ProviderError`] carrying a machine-readable
//! classification for the retry policy.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::job::{ErrorClass, GenerationMode, ImagePayload, JobDescriptor};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";

/// Outbound request timeout. The queue imposes no per-attempt timeout of its
/// own; this is the transport-level bound.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How much of an upstream error body is kept in the error message.
const ERROR_BODY_LIMIT: usize = 100;

const QUALITY_SUFFIX_STANDARD: &str =
    "\n\nOutput quality: 1K/2K resolution, fast and economical generation.";
const QUALITY_SUFFIX_4K: &str =
    "\n\nOutput quality: 4K resolution, maximum detail and quality.";
const REF_STYLE_SUFFIX: &str = "\n\nNOTE: A reference (style) image has been provided. \
    Please generate the output with a similar overall style (color palette, line style, \
    texture/lighting, composition) to this reference image. However, do not compromise \
    content accuracy or the instructions in the prompt.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Gemini,
    OpenAi,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limit exceeded. Reduce parallel workers or wait a few minutes.")]
    RateLimited,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to decode image payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("No image data in response")]
    MissingImage,

    #[error("provider call failed: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Classification consumed by the retry policy. Set structurally at the
    /// adapter boundary so the queue never parses message text.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::RateLimited => ErrorClass::RateLimited,
            ProviderError::InvalidRequest(_) => ErrorClass::Invalid,
            ProviderError::Status { status, .. } => match status {
                429 => ErrorClass::RateLimited,
                500..=599 => ErrorClass::ServerError,
                400..=499 => ErrorClass::Invalid,
                _ => ErrorClass::Unknown,
            },
            ProviderError::Network(_) => ErrorClass::Transport,
            ProviderError::Decode(_) | ProviderError::MissingImage => ErrorClass::Unknown,
            ProviderError::Internal(_) => ErrorClass::Unknown,
        }
    }
}

/// Map a non-success response to a typed error, keeping a truncated body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    if status == StatusCode::BAD_REQUEST {
        return Err(ProviderError::InvalidRequest(
            "Invalid request. Check your prompt or API key.".to_string(),
        ));
    }
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(ERROR_BODY_LIMIT)
        .collect();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

fn quality_suffix(quality: &str) -> &'static str {
    match quality {
        "standard" => QUALITY_SUFFIX_STANDARD,
        "4k" => QUALITY_SUFFIX_4K,
        _ => "",
    }
}

fn inline_data_part(image: &ImagePayload) -> Value {
    let mime_type = if image.mime_type.is_empty() {
        "image/png"
    } else {
        &image.mime_type
    };
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": BASE64.encode(&image.data),
        }
    })
}

/// Pull inline image data out of a `generateContent` response.
fn extract_gemini_image(response: &Value) -> Result<Vec<u8>, ProviderError> {
    for candidate in response["candidates"].as_array().into_iter().flatten() {
        for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
            // Both camelCase and snake_case spellings appear in the wild.
            let inline = if part["inlineData"].is_object() {
                &part["inlineData"]
            } else {
                &part["inline_data"]
            };
            if let Some(data) = inline["data"].as_str() {
                return Ok(BASE64.decode(data)?);
            }
        }
    }
    Err(ProviderError::MissingImage)
}

/// Pull image data out of an Imagen `:predict` response, which has gone
/// through several field-name revisions upstream.
fn extract_imagen_image(response: &Value) -> Result<Vec<u8>, ProviderError> {
    let candidates = [
        &response["generatedImages"][0],
        &response["images"][0],
        &response["predictions"][0],
    ];
    for candidate in candidates {
        if candidate.is_null() {
            continue;
        }
        for field in ["bytesBase64Encoded", "b64_json", "image", "data"] {
            if let Some(b64) = candidate[field].as_str() {
                return Ok(BASE64.decode(b64)?);
            }
        }
    }
    Err(ProviderError::MissingImage)
}

/// Client for Gemini image models via the Generative Language API.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, GEMINI_BASE_URL)
    }

    /// Base-URL override for tests and proxy routing.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    pub async fn generate(&self, job: &JobDescriptor) -> Result<Vec<u8>, ProviderError> {
        // Imagen models use the predict endpoint with a different payload.
        if job.model.starts_with("imagen") {
            return self.generate_imagen(job).await;
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, job.model);
        let payload = json!({
            "contents": [{ "parts": self.build_parts(job) }],
            "generationConfig": { "responseModalities": ["IMAGE"] },
        });

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        let data: Value = response.json().await?;

        extract_gemini_image(&data)
    }

    async fn generate_imagen(&self, job: &JobDescriptor) -> Result<Vec<u8>, ProviderError> {
        let url = format!("{}/models/{}:predict", self.base_url, job.model);
        let payload = json!({
            "instances": [{ "prompt": job.prompt }],
            "parameters": { "sampleCount": 1 },
        });

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        let data: Value = response.json().await?;

        extract_imagen_image(&data)
    }

    fn build_parts(&self, job: &JobDescriptor) -> Vec<Value> {
        let mut prompt = job.prompt.clone();
        prompt.push_str(quality_suffix(&job.quality));
        if job.ref_image.is_some() {
            prompt.push_str(REF_STYLE_SUFFIX);
        }

        let mut parts = vec![json!({ "text": prompt })];
        if let Some(ref_image) = &job.ref_image {
            parts.push(inline_data_part(ref_image));
        }
        if job.mode == GenerationMode::Edit {
            if let Some(input) = &job.input_image {
                parts.push(inline_data_part(input));
            }
        }
        parts
    }
}

/// The quality string each OpenAI model expects.
fn openai_quality(model: &str, quality: &str) -> &'static str {
    let hd = quality == "hd";
    if model == "dall-e-3" {
        if hd {
            "hd"
        } else {
            "standard"
        }
    } else if hd {
        "high"
    } else {
        "low"
    }
}

/// Client for the OpenAI images API (DALL-E 3 and GPT Image).
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    images_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_images_url(api_key, OPENAI_IMAGES_URL)
    }

    /// Endpoint override for tests and proxy routing.
    pub fn with_images_url(api_key: impl Into<String>, images_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.into(),
            images_url: images_url.into(),
        }
    }

    pub async fn generate(&self, job: &JobDescriptor) -> Result<Vec<u8>, ProviderError> {
        let payload = json!({
            "model": job.model,
            "prompt": job.prompt,
            "n": 1,
            "size": job.size.as_deref().unwrap_or("1024x1024"),
            "quality": openai_quality(&job.model, &job.quality),
            "response_format": "b64_json",
        });

        let response = self
            .http
            .post(&self.images_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        let data: Value = response.json().await?;

        let first = &data["data"][0];
        if let Some(b64) = first["b64_json"].as_str() {
            return Ok(BASE64.decode(b64)?);
        }
        // Fallback for URL-based responses.
        if let Some(url) = first["url"].as_str() {
            return self.fetch_image(url).await;
        }
        Err(ProviderError::MissingImage)
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self.http.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Routes jobs to the configured provider.
pub enum ProviderClient {
    Gemini(GeminiClient),
    OpenAi(OpenAiClient),
}

impl ProviderClient {
    pub fn new(provider: ProviderId, api_key: impl Into<String>) -> Self {
        match provider {
            ProviderId::Gemini => ProviderClient::Gemini(GeminiClient::new(api_key)),
            ProviderId::OpenAi => ProviderClient::OpenAi(OpenAiClient::new(api_key)),
        }
    }

    pub fn provider(&self) -> ProviderId {
        match self {
            ProviderClient::Gemini(_) => ProviderId::Gemini,
            ProviderClient::OpenAi(_) => ProviderId::OpenAi,
        }
    }

    pub async fn generate(&self, job: &JobDescriptor) -> Result<Vec<u8>, ProviderError> {
        match self {
            ProviderClient::Gemini(client) => client.generate(job).await,
            ProviderClient::OpenAi(client) => client.generate(job).await,
        }
    }
}

pub const DALL_E_3_SIZES: &[&str] = &["1024x1024", "1792x1024", "1024x1792"];
pub const GPT_IMAGE_1_SIZES: &[&str] = &["1024x1024", "1536x1024", "1024x1536", "auto"];

/// Sizes a given OpenAI model accepts.
pub fn supported_sizes(model: &str) -> &'static [&'static str] {
    match model {
        "dall-e-3" => DALL_E_3_SIZES,
        "gpt-image-1" => GPT_IMAGE_1_SIZES,
        _ => &["1024x1024"],
    }
}

/// Per-image price estimate in USD. Unknown combinations estimate to 0.
pub fn price_estimate(provider: ProviderId, model: &str, quality: &str, size: &str) -> f64 {
    match provider {
        ProviderId::Gemini => match model {
            "gemini-2.0-flash-image-preview" => 0.039,
            "gemini-3-pro-image-preview" => {
                if quality == "4k" {
                    0.080
                } else {
                    0.040
                }
            }
            _ => 0.0,
        },
        ProviderId::OpenAi => {
            let hd = quality == "hd";
            match model {
                "dall-e-3" => match size {
                    "1024x1024" => {
                        if hd {
                            0.08
                        } else {
                            0.04
                        }
                    }
                    "1792x1024" | "1024x1792" => {
                        if hd {
                            0.12
                        } else {
                            0.08
                        }
                    }
                    _ => 0.0,
                },
                "gpt-image-1" => match size {
                    "1024x1024" | "auto" => {
                        if hd {
                            0.016
                        } else {
                            0.011
                        }
                    }
                    "1536x1024" | "1024x1536" => {
                        if hd {
                            0.024
                        } else {
                            0.016
                        }
                    }
                    _ => 0.0,
                },
                _ => 0.0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors_classify_structurally() {
        let rate_limited = ProviderError::RateLimited;
        assert_eq!(rate_limited.class(), ErrorClass::RateLimited);

        let server = ProviderError::Status {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(server.class(), ErrorClass::ServerError);

        let invalid = ProviderError::Status {
            status: 401,
            body: "bad key".to_string(),
        };
        assert_eq!(invalid.class(), ErrorClass::Invalid);
    }

    #[test]
    fn test_status_message_carries_code_for_fallback_classifier() {
        let err = ProviderError::Status {
            status: 502,
            body: "gateway".to_string(),
        };
        assert_eq!(ErrorClass::from_message(&err.to_string()), ErrorClass::ServerError);
    }

    #[test]
    fn test_extract_gemini_image_camel_and_snake_case() {
        let png = BASE64.encode([1u8, 2, 3]);
        let camel = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "ignored" },
                { "inlineData": { "mimeType": "image/png", "data": png.clone() } },
            ]}}]
        });
        assert_eq!(extract_gemini_image(&camel).unwrap(), vec![1, 2, 3]);

        let snake = json!({
            "candidates": [{ "content": { "parts": [
                { "inline_data": { "data": png } },
            ]}}]
        });
        assert_eq!(extract_gemini_image(&snake).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_extract_gemini_image_missing() {
        let empty = json!({ "candidates": [] });
        assert!(matches!(
            extract_gemini_image(&empty),
            Err(ProviderError::MissingImage)
        ));
    }

    #[test]
    fn test_extract_imagen_image_field_revisions() {
        let b64 = BASE64.encode([9u8, 8]);
        let modern = json!({ "generatedImages": [{ "bytesBase64Encoded": b64.clone() }] });
        assert_eq!(extract_imagen_image(&modern).unwrap(), vec![9, 8]);

        let legacy = json!({ "predictions": [{ "b64_json": b64 }] });
        assert_eq!(extract_imagen_image(&legacy).unwrap(), vec![9, 8]);
    }

    #[test]
    fn test_openai_quality_mapping_per_model() {
        assert_eq!(openai_quality("dall-e-3", "hd"), "hd");
        assert_eq!(openai_quality("dall-e-3", "standard"), "standard");
        assert_eq!(openai_quality("gpt-image-1", "hd"), "high");
        assert_eq!(openai_quality("gpt-image-1", "standard"), "low");
    }

    #[test]
    fn test_quality_suffix_only_for_known_levels() {
        assert!(quality_suffix("standard").contains("1K/2K"));
        assert!(quality_suffix("4k").contains("4K"));
        assert_eq!(quality_suffix("hd"), "");
    }

    #[test]
    fn test_inline_data_part_defaults_mime_type() {
        let part = inline_data_part(&ImagePayload::new("", vec![0u8]));
        assert_eq!(part["inlineData"]["mimeType"], "image/png");
    }

    #[test]
    fn test_price_estimates_match_catalog() {
        assert_eq!(
            price_estimate(ProviderId::Gemini, "gemini-2.0-flash-image-preview", "standard", ""),
            0.039
        );
        assert_eq!(
            price_estimate(ProviderId::Gemini, "gemini-3-pro-image-preview", "4k", ""),
            0.080
        );
        assert_eq!(
            price_estimate(ProviderId::OpenAi, "dall-e-3", "hd", "1024x1024"),
            0.08
        );
        assert_eq!(
            price_estimate(ProviderId::OpenAi, "gpt-image-1", "standard", "auto"),
            0.011
        );
        assert_eq!(
            price_estimate(ProviderId::OpenAi, "unknown-model", "hd", "1024x1024"),
            0.0
        );
    }
}

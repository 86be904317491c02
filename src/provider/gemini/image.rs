use super::types::{Content, GenerateContentResponse, Part};
use crate::error::{AdapterError, AdapterResult};
use crate::mapper::ProviderPayload;
use crate::models::{AspectRatio, GenerationResult, ImageFormat, Mechanism, ProviderKind};
use crate::normalize;
use crate::provider::http::{Auth, ProviderHttpClient};
use crate::provider::{ProviderAdapter, ProviderCapability, SubmitOutcome};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub static GEMINI_CAPABILITY: ProviderCapability = ProviderCapability {
    provider: ProviderKind::Gemini,
    mechanism: Mechanism::SyncInline,
    dimensions: None,
    aspect_ratios: &AspectRatio::ALL,
    max_images: 1,
    steps: None,
    guidance: None,
    supports_negative_prompt: false,
    supports_seed: false,
    supports_webhook: false,
    max_reference_images: 0,
    output_formats: &[ImageFormat::Png],
};

#[derive(Debug, Serialize)]
struct ImageRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: ImageGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageGenerationConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

/// Synchronous inline-bytes adapter for Gemini image models.
pub struct GeminiImageAdapter {
    http: ProviderHttpClient,
    model: String,
}

impl GeminiImageAdapter {
    /// `model` may be given with or without the `models/` prefix.
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self::new_with_client(api_key, model, reqwest::Client::new())
    }

    pub fn new_with_client(api_key: String, model: Option<String>, client: reqwest::Client) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let model = model.strip_prefix("models/").unwrap_or(&model).to_string();

        Self {
            http: ProviderHttpClient::new(
                ProviderKind::Gemini,
                client,
                Auth::Header {
                    name: "x-goog-api-key",
                    value: api_key,
                },
                DEFAULT_BASE_URL,
                Duration::from_secs(120),
            ),
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.http = self.http.with_base_url(base_url);
        self
    }

    fn build_request(payload: &ProviderPayload) -> ImageRequest {
        ImageRequest {
            contents: vec![Content {
                role: None,
                parts: vec![Part::Text {
                    text: format!("Generate an image: {}", payload.prompt),
                }],
            }],
            generation_config: ImageGenerationConfig {
                response_modalities: vec!["IMAGE".to_string()],
                image_config: payload.aspect_ratio.map(|ratio| ImageConfig {
                    aspect_ratio: ratio.token().to_string(),
                }),
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiImageAdapter {
    fn capability(&self) -> &ProviderCapability {
        &GEMINI_CAPABILITY
    }

    async fn submit(&self, payload: &ProviderPayload) -> AdapterResult<SubmitOutcome> {
        let model = payload
            .model
            .as_deref()
            .map(|m| m.strip_prefix("models/").unwrap_or(m))
            .unwrap_or(&self.model);
        let path = format!("/v1beta/models/{}:generateContent", model);

        let response: GenerateContentResponse = self
            .http
            .post_json(&path, &Self::build_request(payload))
            .await?;

        normalize_response(response).map(SubmitOutcome::ImmediateResult)
    }
}

fn normalize_response(response: GenerateContentResponse) -> AdapterResult<GenerationResult> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return Err(AdapterError::invalid_request(format!(
            "Gemini blocked the prompt: {}",
            reason
        )));
    }

    let mut images = Vec::new();
    for candidate in &response.candidates {
        let parts = candidate.content.iter().flat_map(|content| &content.parts);
        for part in parts {
            if let Part::InlineData { inline_data } = part {
                tracing::debug!(
                    "Gemini returned image with mime_type: {}",
                    inline_data.mime_type
                );
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(&inline_data.data)
                    .map_err(|e| {
                        AdapterError::provider_fault(format!(
                            "Failed to decode Gemini base64 image: {}",
                            e
                        ))
                    })?;
                images.push(normalize::image_from_inline(
                    bytes,
                    Some(&inline_data.mime_type),
                ));
            }
        }
    }

    if images.is_empty() {
        let finish_reason = response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .unwrap_or("unknown");
        return Err(AdapterError::provider_fault(format!(
            "No image data in Gemini response (finish reason: {})",
            finish_reason
        )));
    }

    let mut usage = normalize::usage_from_value(response.usage_metadata);
    if let Some(version) = response.model_version {
        usage.insert("modelVersion".to_string(), serde_json::Value::String(version));
    }

    Ok(GenerationResult {
        images,
        cost: None,
        seed: None,
        usage,
    })
}

//! Leonardo REST and webhook payload types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct CreateGenerationRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(rename = "modelId")]
    pub model_id: String,
    pub width: u32,
    pub height: u32,
    pub num_images: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_image_id: Option<String>,
    #[serde(rename = "presetStyle")]
    pub preset_style: &'static str,
    pub alchemy: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateGenerationResponse {
    #[serde(rename = "sdGenerationJob")]
    pub sd_generation_job: Option<GenerationJob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub generation_id: String,
    pub api_credit_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct GetGenerationResponse {
    pub generations_by_pk: Option<Generation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    Pending,
    Complete,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Generation record as returned by `GET /generations/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub id: Option<String>,
    pub status: GenerationStatus,
    #[serde(default, rename = "generated_images")]
    pub generated_images: Vec<LeonardoImage>,
    pub seed: Option<u64>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeonardoImage {
    pub id: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub nsfw: Option<bool>,
}

/// Callback envelope Leonardo posts when a generation finishes.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: WebhookGeneration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookGeneration {
    pub id: String,
    pub status: GenerationStatus,
    #[serde(default)]
    pub images: Vec<LeonardoImage>,
    pub seed: Option<u64>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub model_id: Option<String>,
}

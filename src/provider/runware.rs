//! Runware `imageInference` adapter.
//!
//! Runware answers synchronously with image URLs. Task-level failures come
//! back as an `errors` array, sometimes alongside a 2xx status.

use crate::error::{AdapterError, AdapterErrorKind, AdapterResult};
use crate::mapper::{ProviderPayload, DEFAULT_DIMENSION};
use crate::models::{AspectRatio, GenerationResult, ImageFormat, Mechanism, ProviderKind, UsageMetadata};
use crate::normalize;
use crate::provider::http::{Auth, ProviderHttpClient};
use crate::provider::{DimensionBounds, ProviderAdapter, ProviderCapability, SubmitOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_MODEL: &str = "runware:100@1";
const DEFAULT_BASE_URL: &str = "https://api.runware.ai";

pub static RUNWARE_CAPABILITY: ProviderCapability = ProviderCapability {
    provider: ProviderKind::Runware,
    mechanism: Mechanism::SyncDirect,
    dimensions: Some(DimensionBounds {
        min: 128,
        max: 2048,
        multiple_of: 64,
    }),
    aspect_ratios: &AspectRatio::ALL,
    max_images: 20,
    steps: Some(1..=100),
    guidance: Some(0.0..=50.0),
    supports_negative_prompt: true,
    supports_seed: true,
    supports_webhook: false,
    max_reference_images: 1,
    output_formats: &[ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Webp],
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageInferenceTask {
    task_type: &'static str,
    #[serde(rename = "taskUUID")]
    task_uuid: String,
    positive_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    model: String,
    width: u32,
    height: u32,
    number_results: u32,
    output_type: &'static str,
    output_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<u32>,
    #[serde(rename = "CFGScale", skip_serializing_if = "Option::is_none")]
    cfg_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed_image: Option<String>,
    include_cost: bool,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    data: Vec<InferenceItem>,
    #[serde(default)]
    errors: Vec<TaskError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceItem {
    task_type: Option<String>,
    #[serde(rename = "imageUUID")]
    image_uuid: Option<String>,
    #[serde(rename = "imageURL")]
    image_url: Option<String>,
    seed: Option<u64>,
    cost: Option<f64>,
    #[serde(rename = "NSFWContent")]
    nsfw_content: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TaskError {
    code: Option<String>,
    message: Option<String>,
}

pub struct RunwareImageAdapter {
    http: ProviderHttpClient,
    model: String,
}

impl RunwareImageAdapter {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self::new_with_client(api_key, model, reqwest::Client::new())
    }

    pub fn new_with_client(api_key: String, model: Option<String>, client: reqwest::Client) -> Self {
        Self {
            http: ProviderHttpClient::new(
                ProviderKind::Runware,
                client,
                Auth::Bearer(api_key),
                DEFAULT_BASE_URL,
                Duration::from_secs(120),
            ),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.http = self.http.with_base_url(base_url);
        self
    }

    fn build_task(&self, payload: &ProviderPayload) -> ImageInferenceTask {
        ImageInferenceTask {
            task_type: "imageInference",
            task_uuid: Uuid::new_v4().to_string(),
            positive_prompt: payload.prompt.clone(),
            negative_prompt: payload.negative_prompt.clone(),
            model: payload.model.clone().unwrap_or_else(|| self.model.clone()),
            width: payload.width.unwrap_or(DEFAULT_DIMENSION),
            height: payload.height.unwrap_or(DEFAULT_DIMENSION),
            number_results: payload.num_images,
            output_type: "URL",
            output_format: match payload.output_format.unwrap_or_default() {
                ImageFormat::Png => "PNG",
                ImageFormat::Jpeg => "JPG",
                ImageFormat::Webp => "WEBP",
            },
            seed: payload.seed,
            steps: payload.steps,
            cfg_scale: payload.guidance_scale,
            seed_image: payload.reference_images.first().cloned(),
            include_cost: true,
        }
    }
}

#[async_trait]
impl ProviderAdapter for RunwareImageAdapter {
    fn capability(&self) -> &ProviderCapability {
        &RUNWARE_CAPABILITY
    }

    async fn submit(&self, payload: &ProviderPayload) -> AdapterResult<SubmitOutcome> {
        let task = self.build_task(payload);
        tracing::debug!("[Runware] Submitting task {}", task.task_uuid);

        let response: InferenceResponse = self.http.post_json("/v1", &[task]).await?;
        let format = payload.output_format;

        normalize_response(response, format).map(SubmitOutcome::ImmediateResult)
    }
}

fn normalize_response(
    response: InferenceResponse,
    format: Option<ImageFormat>,
) -> AdapterResult<GenerationResult> {
    if let Some(error) = response.errors.first() {
        return Err(task_error(error));
    }

    let items: Vec<InferenceItem> = response
        .data
        .into_iter()
        .filter(|item| item.task_type.as_deref().unwrap_or("imageInference") == "imageInference")
        .collect();

    let cost = normalize::total_cost(items.iter().map(|item| item.cost));
    let seed = items.first().and_then(|item| item.seed);

    let mut images = Vec::with_capacity(items.len());
    for item in items {
        let Some(url) = item.image_url else {
            continue;
        };
        let mut image = normalize::image_from_url(url, format);
        image.provider_image_id = item.image_uuid;
        image.seed = item.seed;
        image.nsfw = item.nsfw_content;
        images.push(image);
    }

    if images.is_empty() {
        return Err(AdapterError::provider_fault(
            "Runware response contained no image URLs",
        ));
    }

    let mut usage = UsageMetadata::new();
    usage.insert("imageCount".to_string(), images.len().into());

    Ok(GenerationResult {
        images,
        cost,
        seed,
        usage,
    })
}

fn task_error(error: &TaskError) -> AdapterError {
    let code = error.code.as_deref().unwrap_or("unknown");
    let message = error.message.as_deref().unwrap_or("no message");
    AdapterError::new(classify_error_code(code), format!("{}: {}", code, message))
}

fn classify_error_code(code: &str) -> AdapterErrorKind {
    let code = code.to_ascii_lowercase();
    if code.contains("apikey") || code.contains("unauthor") || code.contains("auth") {
        AdapterErrorKind::Auth
    } else if code.contains("ratelimit") || code.contains("toomany") {
        AdapterErrorKind::RateLimited
    } else if code.starts_with("invalid") || code.contains("missing") || code.contains("unsupported") {
        AdapterErrorKind::InvalidRequest
    } else {
        AdapterErrorKind::ProviderFault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::map_request;
    use crate::models::{GenerationRequest, ImageSource};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_adapter(server: &MockServer) -> RunwareImageAdapter {
        RunwareImageAdapter::new("rw-key".to_string(), None).with_base_url(server.uri())
    }

    fn payload(request: GenerationRequest) -> ProviderPayload {
        map_request(&request, &RUNWARE_CAPABILITY).unwrap().payload
    }

    #[tokio::test]
    async fn test_submit_returns_url_images_with_summed_cost() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1"))
            .and(header("Authorization", "Bearer rw-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "taskType": "imageInference",
                        "taskUUID": "t-1",
                        "imageUUID": "img-1",
                        "imageURL": "https://im.runware.ai/image/img-1.png",
                        "seed": 77,
                        "cost": 0.0013
                    },
                    {
                        "taskType": "imageInference",
                        "taskUUID": "t-1",
                        "imageUUID": "img-2",
                        "imageURL": "https://im.runware.ai/image/img-2.png",
                        "seed": 77,
                        "cost": 0.0013
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = make_adapter(&server)
            .submit(&payload(GenerationRequest::new("a lighthouse").with_num_images(2)))
            .await
            .unwrap();

        let result = match outcome {
            SubmitOutcome::ImmediateResult(result) => result,
            other => panic!("expected immediate result, got {:?}", other),
        };
        assert_eq!(result.images.len(), 2);
        assert_eq!(result.images[0].provider_image_id.as_deref(), Some("img-1"));
        assert_eq!(
            result.images[1].source,
            ImageSource::Url {
                url: "https://im.runware.ai/image/img-2.png".to_string()
            }
        );
        assert_eq!(result.seed, Some(77));
        assert!((result.cost.unwrap() - 0.0026).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_task_carries_mapped_parameters() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1"))
            .and(body_partial_json(serde_json::json!([{
                "taskType": "imageInference",
                "positivePrompt": "a lighthouse",
                "negativePrompt": "fog",
                "model": "runware:100@1",
                "width": 512,
                "height": 768,
                "numberResults": 1,
                "outputType": "URL",
                "outputFormat": "PNG",
                "seed": 9,
                "CFGScale": 50.0
            }])))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "taskType": "imageInference", "imageURL": "https://im.runware.ai/x.png" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerationRequest {
            guidance_scale: Some(80.0),
            ..GenerationRequest::new("a lighthouse")
                .with_dimensions(500, 770)
                .with_negative_prompt("fog")
                .with_seed(9)
        };
        make_adapter(&server).submit(&payload(request)).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_array_is_classified() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": [{ "code": "invalidApiKey", "message": "Invalid API key" }]
            })))
            .mount(&server)
            .await;

        let err = make_adapter(&server)
            .submit(&payload(GenerationRequest::new("a lighthouse")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Auth);
        assert_eq!(err.cause, "invalidApiKey: Invalid API key");
    }

    #[tokio::test]
    async fn test_empty_data_is_provider_fault() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;

        let err = make_adapter(&server)
            .submit(&payload(GenerationRequest::new("a lighthouse")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::ProviderFault);
    }

    #[tokio::test]
    async fn test_server_error_is_provider_fault() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = make_adapter(&server)
            .submit(&payload(GenerationRequest::new("a lighthouse")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::ProviderFault);
        assert!(err.kind.is_retryable());
    }

    #[test]
    fn test_error_code_classification() {
        assert_eq!(classify_error_code("invalidApiKey"), AdapterErrorKind::Auth);
        assert_eq!(classify_error_code("rateLimitExceeded"), AdapterErrorKind::RateLimited);
        assert_eq!(classify_error_code("invalidWidth"), AdapterErrorKind::InvalidRequest);
        assert_eq!(classify_error_code("somethingNew"), AdapterErrorKind::ProviderFault);
    }
}

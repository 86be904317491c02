use super::types::{
    CreateGenerationRequest, CreateGenerationResponse, GenerationStatus, GetGenerationResponse,
    LeonardoImage, WebhookEnvelope,
};
use crate::error::{AdapterError, AdapterResult};
use crate::mapper::{ProviderPayload, DEFAULT_DIMENSION};
use crate::models::{AspectRatio, GenerationResult, ImageFormat, Mechanism, ProviderKind, UsageMetadata};
use crate::normalize;
use crate::provider::http::{Auth, ProviderHttpClient};
use crate::provider::{
    DimensionBounds, PollOutcome, ProviderAdapter, ProviderCapability, SubmitOutcome, WebhookEvent,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Phoenix 1.0
pub const DEFAULT_MODEL: &str = "de7d3faf-762f-48e0-b3b7-9d0ac3a3fcf3";
const DEFAULT_BASE_URL: &str = "https://cloud.leonardo.ai/api/rest/v1";
const DEFAULT_PRESET_STYLE: &str = "DYNAMIC";

pub static LEONARDO_CAPABILITY: ProviderCapability = ProviderCapability {
    provider: ProviderKind::Leonardo,
    mechanism: Mechanism::AsyncPolled,
    dimensions: Some(DimensionBounds {
        min: 32,
        max: 1536,
        multiple_of: 8,
    }),
    aspect_ratios: &AspectRatio::ALL,
    max_images: 8,
    steps: Some(10..=60),
    guidance: Some(1.0..=20.0),
    supports_negative_prompt: true,
    supports_seed: true,
    supports_webhook: true,
    max_reference_images: 1,
    output_formats: &[ImageFormat::Jpeg],
};

/// Asynchronous adapter: submission queues a generation, completion is
/// observed by polling or by Leonardo's webhook callback.
pub struct LeonardoImageAdapter {
    http: ProviderHttpClient,
    model: String,
}

impl LeonardoImageAdapter {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self::new_with_client(api_key, model, reqwest::Client::new())
    }

    pub fn new_with_client(api_key: String, model: Option<String>, client: reqwest::Client) -> Self {
        Self {
            http: ProviderHttpClient::new(
                ProviderKind::Leonardo,
                client,
                Auth::Bearer(api_key),
                DEFAULT_BASE_URL,
                Duration::from_secs(30),
            ),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.http = self.http.with_base_url(base_url);
        self
    }

    fn build_request(&self, payload: &ProviderPayload) -> CreateGenerationRequest {
        CreateGenerationRequest {
            prompt: payload.prompt.clone(),
            negative_prompt: payload.negative_prompt.clone(),
            model_id: payload.model.clone().unwrap_or_else(|| self.model.clone()),
            width: payload.width.unwrap_or(DEFAULT_DIMENSION),
            height: payload.height.unwrap_or(DEFAULT_DIMENSION),
            num_images: payload.num_images,
            seed: payload.seed,
            guidance_scale: payload.guidance_scale,
            num_inference_steps: payload.steps,
            init_image_id: payload.reference_images.first().cloned(),
            preset_style: DEFAULT_PRESET_STYLE,
            alchemy: true,
        }
    }
}

#[async_trait]
impl ProviderAdapter for LeonardoImageAdapter {
    fn capability(&self) -> &ProviderCapability {
        &LEONARDO_CAPABILITY
    }

    async fn submit(&self, payload: &ProviderPayload) -> AdapterResult<SubmitOutcome> {
        let response: CreateGenerationResponse = self
            .http
            .post_json("/generations", &self.build_request(payload))
            .await?;

        let job = response.sd_generation_job.ok_or_else(|| {
            AdapterError::provider_fault("Leonardo response is missing sdGenerationJob")
        })?;

        tracing::info!("[Leonardo] Generation {} queued", job.generation_id);
        Ok(SubmitOutcome::Accepted {
            provider_generation_id: job.generation_id,
            cost: job.api_credit_cost,
        })
    }

    async fn poll_status(&self, provider_generation_id: &str) -> AdapterResult<PollOutcome> {
        let response: GetGenerationResponse = self
            .http
            .get_json(&format!("/generations/{}", provider_generation_id))
            .await?;

        // The record can lag the submission briefly.
        let Some(generation) = response.generations_by_pk else {
            return Ok(PollOutcome::StillPending);
        };

        Ok(generation_outcome(GenerationSnapshot {
            id: provider_generation_id,
            status: generation.status,
            images: generation.generated_images,
            seed: generation.seed,
            width: generation.image_width,
            height: generation.image_height,
            model_id: generation.model_id,
        }))
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent> {
        let envelope: WebhookEnvelope =
            serde_json::from_slice(body).map_err(|e| Error::WebhookParse(e.to_string()))?;

        if let Some(event_type) = envelope.event_type.as_deref() {
            tracing::debug!("[Leonardo] Webhook event type {}", event_type);
        }

        let generation = envelope.data.object;
        let outcome = generation_outcome(GenerationSnapshot {
            id: &generation.id,
            status: generation.status,
            images: generation.images,
            seed: generation.seed,
            width: generation.image_width,
            height: generation.image_height,
            model_id: generation.model_id,
        });

        Ok(WebhookEvent {
            provider_generation_id: generation.id,
            outcome,
        })
    }
}

/// Fields shared by the poll record and the webhook object.
struct GenerationSnapshot<'a> {
    id: &'a str,
    status: GenerationStatus,
    images: Vec<LeonardoImage>,
    seed: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    model_id: Option<String>,
}

fn generation_outcome(snapshot: GenerationSnapshot<'_>) -> PollOutcome {
    match snapshot.status {
        GenerationStatus::Pending | GenerationStatus::Unknown => PollOutcome::StillPending,
        GenerationStatus::Failed => {
            PollOutcome::ProviderFailed(format!("Leonardo generation {} failed", snapshot.id))
        }
        GenerationStatus::Complete => {
            let images: Vec<_> = snapshot
                .images
                .into_iter()
                .filter_map(|img| {
                    let url = img.url?;
                    let mut image = normalize::image_from_url(url, None);
                    image.provider_image_id = img.id;
                    image.width = snapshot.width;
                    image.height = snapshot.height;
                    image.seed = snapshot.seed;
                    image.nsfw = img.nsfw;
                    Some(image)
                })
                .collect();

            if images.is_empty() {
                return PollOutcome::ProviderFailed(format!(
                    "Leonardo generation {} completed without images",
                    snapshot.id
                ));
            }

            let mut usage = UsageMetadata::new();
            usage.insert("generationId".to_string(), snapshot.id.into());
            if let Some(model_id) = snapshot.model_id {
                usage.insert("modelId".to_string(), model_id.into());
            }

            PollOutcome::Completed(GenerationResult {
                images,
                cost: None,
                seed: snapshot.seed,
                usage,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;
    use crate::mapper::map_request;
    use crate::models::{GenerationRequest, ImageSource};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_adapter(server: &MockServer) -> LeonardoImageAdapter {
        LeonardoImageAdapter::new("leo-key".to_string(), None).with_base_url(server.uri())
    }

    fn payload(request: GenerationRequest) -> ProviderPayload {
        map_request(&request, &LEONARDO_CAPABILITY).unwrap().payload
    }

    fn complete_generation() -> serde_json::Value {
        serde_json::json!({
            "generations_by_pk": {
                "id": "gen-1",
                "status": "COMPLETE",
                "seed": 4242,
                "imageWidth": 768,
                "imageHeight": 512,
                "modelId": DEFAULT_MODEL,
                "generated_images": [
                    { "id": "img-1", "url": "https://cdn.leonardo.ai/users/u/generations/gen-1/a.jpg", "nsfw": false }
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_submit_returns_generation_id_and_cost() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/generations"))
            .and(header("Authorization", "Bearer leo-key"))
            .and(body_partial_json(serde_json::json!({
                "prompt": "a castle",
                "modelId": DEFAULT_MODEL,
                "width": 768,
                "height": 512,
                "num_images": 2,
                "presetStyle": "DYNAMIC",
                "alchemy": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sdGenerationJob": { "generationId": "gen-1", "apiCreditCost": 16 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerationRequest::new("a castle")
            .with_dimensions(768, 512)
            .with_num_images(2);
        let outcome = make_adapter(&server).submit(&payload(request)).await.unwrap();

        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                provider_generation_id: "gen-1".to_string(),
                cost: Some(16.0),
            }
        );
    }

    #[tokio::test]
    async fn test_submit_without_job_is_provider_fault() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = make_adapter(&server)
            .submit(&payload(GenerationRequest::new("a castle")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::ProviderFault);
    }

    #[tokio::test]
    async fn test_poll_pending_and_missing_record_are_still_pending() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/generations/gen-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "generations_by_pk": { "id": "gen-1", "status": "PENDING", "generated_images": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/generations/gen-2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "generations_by_pk": null })),
            )
            .mount(&server)
            .await;

        let adapter = make_adapter(&server);
        assert_eq!(adapter.poll_status("gen-1").await.unwrap(), PollOutcome::StillPending);
        assert_eq!(adapter.poll_status("gen-2").await.unwrap(), PollOutcome::StillPending);
    }

    #[tokio::test]
    async fn test_poll_complete_normalizes_images() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/generations/gen-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(complete_generation()))
            .mount(&server)
            .await;

        let outcome = make_adapter(&server).poll_status("gen-1").await.unwrap();

        let result = match outcome {
            PollOutcome::Completed(result) => result,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(result.seed, Some(4242));
        assert_eq!(result.images.len(), 1);
        let image = &result.images[0];
        assert_eq!(image.provider_image_id.as_deref(), Some("img-1"));
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!((image.width, image.height), (Some(768), Some(512)));
        assert_eq!(image.nsfw, Some(false));
        assert!(matches!(image.source, ImageSource::Url { .. }));
        assert_eq!(result.usage["generationId"], "gen-1");
    }

    #[tokio::test]
    async fn test_poll_failed_reports_provider_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/generations/gen-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "generations_by_pk": { "id": "gen-1", "status": "FAILED", "generated_images": [] }
            })))
            .mount(&server)
            .await;

        let outcome = make_adapter(&server).poll_status("gen-1").await.unwrap();
        assert!(matches!(outcome, PollOutcome::ProviderFailed(_)));
    }

    #[tokio::test]
    async fn test_poll_auth_failure_is_classified() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/generations/gen-1"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = make_adapter(&server).poll_status("gen-1").await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Auth);
    }

    #[test]
    fn test_parse_webhook_complete() {
        let adapter = LeonardoImageAdapter::new("k".to_string(), None);
        let body = serde_json::json!({
            "type": "image_generation.complete",
            "object": "generation",
            "data": {
                "object": {
                    "id": "gen-9",
                    "status": "COMPLETE",
                    "seed": 1,
                    "imageWidth": 512,
                    "imageHeight": 512,
                    "images": [{ "id": "img-9", "url": "https://cdn.leonardo.ai/a.jpg", "nsfw": false }]
                }
            }
        });

        let event = adapter
            .parse_webhook(body.to_string().as_bytes())
            .unwrap();

        assert_eq!(event.provider_generation_id, "gen-9");
        assert!(matches!(event.outcome, PollOutcome::Completed(ref r) if r.images.len() == 1));
    }

    #[test]
    fn test_parse_webhook_failed_and_malformed() {
        let adapter = LeonardoImageAdapter::new("k".to_string(), None);
        let body = serde_json::json!({
            "type": "image_generation.complete",
            "data": { "object": { "id": "gen-9", "status": "FAILED" } }
        });

        let event = adapter.parse_webhook(body.to_string().as_bytes()).unwrap();
        assert!(matches!(event.outcome, PollOutcome::ProviderFailed(_)));

        let err = adapter.parse_webhook(b"{not json").unwrap_err();
        assert!(matches!(err, Error::WebhookParse(_)));
    }
}

use super::{
    PollOutcome, ProviderAdapter, ProviderCapability, SubmitOutcome, WebhookEvent,
    LEONARDO_CAPABILITY, RUNWARE_CAPABILITY,
};
use crate::error::AdapterResult;
use crate::mapper::ProviderPayload;
use crate::models::{GenerationResult, Mechanism, ProviderKind};
use crate::normalize;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Scripted adapter for tests and local wiring.
///
/// Responses queued with `with_*` are consumed in order; once a queue is
/// empty the adapter falls back to a successful default.
#[derive(Clone)]
pub struct MockAdapter {
    capability: ProviderCapability,
    submit_responses: Arc<Mutex<VecDeque<AdapterResult<SubmitOutcome>>>>,
    poll_responses: Arc<Mutex<VecDeque<AdapterResult<PollOutcome>>>>,
    submit_delay: Duration,
    submit_count: Arc<Mutex<usize>>,
    poll_count: Arc<Mutex<usize>>,
    last_payload: Arc<Mutex<Option<ProviderPayload>>>,
}

/// Webhook body accepted by the mock: `{"generation_id", "status", "image_url", "reason"}`.
#[derive(Debug, Deserialize)]
struct MockWebhook {
    generation_id: String,
    status: String,
    image_url: Option<String>,
    reason: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAdapter {
    pub fn new(capability: ProviderCapability) -> Self {
        Self {
            capability,
            submit_responses: Arc::new(Mutex::new(VecDeque::new())),
            poll_responses: Arc::new(Mutex::new(VecDeque::new())),
            submit_delay: Duration::ZERO,
            submit_count: Arc::new(Mutex::new(0)),
            poll_count: Arc::new(Mutex::new(0)),
            last_payload: Arc::new(Mutex::new(None)),
        }
    }

    /// Synchronous URL-returning provider with Runware-like bounds.
    pub fn synchronous(provider: ProviderKind) -> Self {
        Self::new(ProviderCapability {
            provider,
            ..RUNWARE_CAPABILITY.clone()
        })
    }

    /// Asynchronous, webhook-capable provider with Leonardo-like bounds.
    pub fn asynchronous(provider: ProviderKind) -> Self {
        Self::new(ProviderCapability {
            provider,
            ..LEONARDO_CAPABILITY.clone()
        })
    }

    pub fn with_submit_response(self, response: AdapterResult<SubmitOutcome>) -> Self {
        lock(&self.submit_responses).push_back(response);
        self
    }

    pub fn with_poll_response(self, response: AdapterResult<PollOutcome>) -> Self {
        lock(&self.poll_responses).push_back(response);
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn submit_count(&self) -> usize {
        *lock(&self.submit_count)
    }

    pub fn poll_count(&self) -> usize {
        *lock(&self.poll_count)
    }

    pub fn last_payload(&self) -> Option<ProviderPayload> {
        lock(&self.last_payload).clone()
    }

    /// One URL image, as the default synchronous result.
    pub fn sample_result(provider: ProviderKind) -> GenerationResult {
        GenerationResult {
            images: vec![normalize::image_from_url(
                format!("https://mock.invalid/{}/image.png", provider),
                None,
            )],
            ..Default::default()
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn capability(&self) -> &ProviderCapability {
        &self.capability
    }

    async fn submit(&self, payload: &ProviderPayload) -> AdapterResult<SubmitOutcome> {
        let count = {
            let mut count = lock(&self.submit_count);
            *count += 1;
            *count
        };
        *lock(&self.last_payload) = Some(payload.clone());

        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let scripted = lock(&self.submit_responses).pop_front();
        scripted.unwrap_or_else(|| match self.capability.mechanism {
            Mechanism::AsyncPolled => Ok(SubmitOutcome::Accepted {
                provider_generation_id: format!("mock-gen-{}", count),
                cost: None,
            }),
            Mechanism::SyncInline | Mechanism::SyncDirect => Ok(SubmitOutcome::ImmediateResult(
                Self::sample_result(self.capability.provider),
            )),
        })
    }

    async fn poll_status(&self, _provider_generation_id: &str) -> AdapterResult<PollOutcome> {
        *lock(&self.poll_count) += 1;
        let scripted = lock(&self.poll_responses).pop_front();
        scripted.unwrap_or(Ok(PollOutcome::StillPending))
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent> {
        if !self.capability.supports_webhook {
            return Err(Error::WebhookUnsupported(self.capability.provider));
        }

        let hook: MockWebhook =
            serde_json::from_slice(body).map_err(|e| Error::WebhookParse(e.to_string()))?;

        let outcome = match hook.status.as_str() {
            "complete" | "completed" => {
                let mut result = Self::sample_result(self.capability.provider);
                if let Some(url) = hook.image_url {
                    result.images = vec![normalize::image_from_url(url, None)];
                }
                PollOutcome::Completed(result)
            }
            "failed" => PollOutcome::ProviderFailed(
                hook.reason.unwrap_or_else(|| "mock failure".to_string()),
            ),
            "pending" => PollOutcome::StillPending,
            other => {
                return Err(Error::WebhookParse(format!(
                    "unknown mock status '{}'",
                    other
                )))
            }
        };

        Ok(WebhookEvent {
            provider_generation_id: hook.generation_id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::mapper::map_request;
    use crate::models::GenerationRequest;

    fn payload(adapter: &MockAdapter) -> ProviderPayload {
        map_request(&GenerationRequest::new("a fox"), adapter.capability())
            .unwrap()
            .payload
    }

    #[tokio::test]
    async fn test_default_outcomes_follow_mechanism() {
        let sync = MockAdapter::synchronous(ProviderKind::Runware);
        let outcome = sync.submit(&payload(&sync)).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::ImmediateResult(_)));

        let asynchronous = MockAdapter::asynchronous(ProviderKind::Leonardo);
        let outcome = asynchronous.submit(&payload(&asynchronous)).await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                provider_generation_id: "mock-gen-1".to_string(),
                cost: None
            }
        );
        assert_eq!(
            asynchronous.poll_status("mock-gen-1").await.unwrap(),
            PollOutcome::StillPending
        );
    }

    #[tokio::test]
    async fn test_scripted_responses_are_consumed_in_order() {
        let adapter = MockAdapter::asynchronous(ProviderKind::Leonardo)
            .with_poll_response(Err(AdapterError::network("reset")))
            .with_poll_response(Ok(PollOutcome::ProviderFailed("boom".to_string())));

        assert!(adapter.poll_status("g").await.is_err());
        assert_eq!(
            adapter.poll_status("g").await.unwrap(),
            PollOutcome::ProviderFailed("boom".to_string())
        );
        assert_eq!(adapter.poll_status("g").await.unwrap(), PollOutcome::StillPending);
        assert_eq!(adapter.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_records_last_payload() {
        let adapter = MockAdapter::synchronous(ProviderKind::Runware);
        assert!(adapter.last_payload().is_none());

        adapter.submit(&payload(&adapter)).await.unwrap();

        assert_eq!(adapter.submit_count(), 1);
        assert_eq!(adapter.last_payload().unwrap().prompt, "a fox");
    }

    #[test]
    fn test_webhook_requires_capability() {
        let adapter = MockAdapter::synchronous(ProviderKind::Runware);
        let err = adapter.parse_webhook(b"{}").unwrap_err();
        assert!(matches!(err, Error::WebhookUnsupported(ProviderKind::Runware)));
    }

    #[test]
    fn test_webhook_parses_statuses() {
        let adapter = MockAdapter::asynchronous(ProviderKind::Leonardo);

        let event = adapter
            .parse_webhook(br#"{"generation_id":"g1","status":"failed","reason":"nsfw"}"#)
            .unwrap();
        assert_eq!(event.provider_generation_id, "g1");
        assert_eq!(event.outcome, PollOutcome::ProviderFailed("nsfw".to_string()));

        let err = adapter
            .parse_webhook(br#"{"generation_id":"g1","status":"exploded"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::WebhookParse(_)));
    }
}

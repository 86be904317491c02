//! Provider adapters.
//!
//! Each adapter hides one provider's wire protocol behind [`ProviderAdapter`]
//! and reports everything in canonical shapes. Adapters are stateless across
//! jobs; the orchestrator owns lifecycle.

pub mod capability;
pub mod gemini;
pub mod http;
pub mod leonardo;
pub mod mime;
pub mod mock;
pub mod runware;

pub use capability::{DimensionBounds, ProviderCapability};
pub use gemini::{GeminiImageAdapter, GEMINI_CAPABILITY};
pub use leonardo::{LeonardoImageAdapter, LEONARDO_CAPABILITY};
pub use mock::MockAdapter;
pub use runware::{RunwareImageAdapter, RUNWARE_CAPABILITY};

use crate::error::{AdapterError, AdapterResult};
use crate::mapper::ProviderPayload;
use crate::models::{GenerationResult, ProviderKind};
use crate::{Error, Result};
use async_trait::async_trait;

/// What a provider said in response to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Synchronous providers: the final result is already here.
    ImmediateResult(GenerationResult),
    /// Asynchronous providers: work was queued under a provider-side id.
    Accepted {
        provider_generation_id: String,
        cost: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    StillPending,
    Completed(GenerationResult),
    ProviderFailed(String),
}

/// A parsed provider callback.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub provider_generation_id: String,
    pub outcome: PollOutcome,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn capability(&self) -> &ProviderCapability;

    fn kind(&self) -> ProviderKind {
        self.capability().provider
    }

    async fn submit(&self, payload: &ProviderPayload) -> AdapterResult<SubmitOutcome>;

    async fn poll_status(&self, _provider_generation_id: &str) -> AdapterResult<PollOutcome> {
        Err(AdapterError::invalid_request(format!(
            "{} does not support status polling",
            self.kind()
        )))
    }

    fn parse_webhook(&self, _body: &[u8]) -> Result<WebhookEvent> {
        Err(Error::WebhookUnsupported(self.kind()))
    }
}

//! Provider callback ingestion.
//!
//! [`WebhookReceiver::ingest`] parses a provider callback, resolves it to a
//! job and requests the terminal transition. Callbacks for unknown ids and
//! for jobs that are already terminal are acknowledged without effect so
//! providers do not redeliver them.

use crate::error::JobError;
use crate::models::{JobId, ProviderKind};
use crate::orchestrator::{JobOrchestrator, JobState, Transition, TransitionOutcome};
use crate::provider::PollOutcome;
use crate::{Error, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// This callback moved the job to a terminal state.
    Resolved { job_id: JobId, state: JobState },
    /// The job was already terminal; nothing changed.
    AlreadyResolved { job_id: JobId, state: JobState },
    /// Progress notification for a job still in flight.
    Progress { job_id: JobId },
    /// The job has not yet recorded its submission; the callback is dropped
    /// and polling resolves the job once it is submitted.
    NotYetSubmitted { job_id: JobId },
    UnknownGeneration { provider_generation_id: String },
}

#[derive(Clone)]
pub struct WebhookReceiver {
    orchestrator: JobOrchestrator,
    secrets: HashMap<ProviderKind, String>,
}

impl WebhookReceiver {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self {
            orchestrator,
            secrets: HashMap::new(),
        }
    }

    /// Require `Authorization: Bearer <secret>` on callbacks from `provider`.
    pub fn with_secret(mut self, provider: ProviderKind, secret: impl Into<String>) -> Self {
        self.secrets.insert(provider, secret.into());
        self
    }

    pub fn authorize(&self, provider: ProviderKind, authorization: Option<&str>) -> Result<()> {
        let Some(secret) = self.secrets.get(&provider) else {
            return Ok(());
        };
        let presented = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);
        match presented {
            Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
            _ => Err(Error::WebhookUnauthorized),
        }
    }

    pub async fn ingest(&self, provider: ProviderKind, body: &[u8]) -> Result<WebhookOutcome> {
        let adapter = self.orchestrator.adapter(provider)?;
        if !adapter.capability().supports_webhook {
            return Err(Error::WebhookUnsupported(provider));
        }

        let event = adapter.parse_webhook(body)?;
        let Some(job_id) = self
            .orchestrator
            .find_by_provider_generation_id(provider, &event.provider_generation_id)
            .await?
        else {
            info!(
                provider = %provider,
                provider_generation_id = %event.provider_generation_id,
                "Webhook for unknown generation ignored",
            );
            return Ok(WebhookOutcome::UnknownGeneration {
                provider_generation_id: event.provider_generation_id,
            });
        };

        let transition = match event.outcome {
            PollOutcome::StillPending => {
                debug!(%job_id, "Webhook progress notification");
                return Ok(WebhookOutcome::Progress { job_id });
            }
            PollOutcome::Completed(result) => Transition::Completed(result),
            PollOutcome::ProviderFailed(reason) => {
                Transition::Failed(JobError::ProviderFailed { reason })
            }
        };

        match self
            .orchestrator
            .transition(job_id, JobState::Submitted, transition)
            .await?
        {
            TransitionOutcome::Applied(state) => {
                info!(%job_id, provider = %provider, %state, "Job resolved by webhook");
                Ok(WebhookOutcome::Resolved { job_id, state })
            }
            TransitionOutcome::Rejected {
                current: JobState::Pending,
            } => {
                warn!(%job_id, provider = %provider, "Webhook arrived before submission was recorded");
                Ok(WebhookOutcome::NotYetSubmitted { job_id })
            }
            TransitionOutcome::Rejected { current } => {
                debug!(%job_id, %current, "Duplicate or late webhook ignored");
                Ok(WebhookOutcome::AlreadyResolved {
                    job_id,
                    state: current,
                })
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `POST /webhooks/{provider}`
pub fn router(receiver: WebhookReceiver) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(handle_webhook))
        .with_state(receiver)
}

async fn handle_webhook(
    State(receiver): State<WebhookReceiver>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = match provider.parse::<ProviderKind>() {
        Ok(provider) => provider,
        Err(e) => return (StatusCode::NOT_FOUND, Json(ErrorBody::from(&e))).into_response(),
    };

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let result = match receiver.authorize(provider, authorization) {
        Ok(()) => receiver.ingest(provider, &body).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::WebhookParse(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::WebhookUnauthorized => StatusCode::UNAUTHORIZED,
            Error::ProviderNotConfigured(_) | Error::WebhookUnsupported(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "Webhook handling failed");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

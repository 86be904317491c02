//! Error handling and custom error types
//!
//! Provides unified error handling across the orchestration layer using
//! thiserror. Provider transport failures never surface directly: adapters
//! fold them into [`AdapterError`] so callers only see the taxonomy below.

use crate::models::{JobId, ProviderKind};
use crate::orchestrator::JobState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Provider adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Provider reported failure: {0}")]
    ProviderFailed(String),

    #[error("Generation timed out after {attempts} poll attempts ({elapsed_ms} ms)")]
    Timeout { attempts: u32, elapsed_ms: u64 },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Provider '{0}' is not configured")]
    ProviderNotConfigured(ProviderKind),

    #[error("Provider '{0}' does not accept webhooks")]
    WebhookUnsupported(ProviderKind),

    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Webhook payload could not be parsed: {0}")]
    WebhookParse(String),

    #[error("Webhook authentication failed")]
    WebhookUnauthorized,

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a caller may reasonably resubmit after this error.
    ///
    /// Auth, invalid requests, validation failures and cancellations are
    /// final; transport faults, rate limits, provider faults, provider-side
    /// failures and orchestration timeouts are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Adapter(e) => e.kind.is_retryable(),
            Self::ProviderFailed(_) | Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<JobError> for Error {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Adapter(e) => Self::Adapter(e),
            JobError::ProviderFailed { reason } => Self::ProviderFailed(reason),
            JobError::Timeout {
                attempts,
                elapsed_ms,
            } => Self::Timeout {
                attempts,
                elapsed_ms,
            },
            JobError::Cancelled => Self::Cancelled,
            JobError::Internal { reason } => Self::Invariant(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Caller input that violates canonical or provider bounds. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("prompt must not be blank")]
    EmptyPrompt,

    #[error("prompt length {length} is outside 1..={max} characters")]
    PromptLength { length: usize, max: usize },

    #[error("negative prompt length {length} exceeds {max} characters")]
    NegativePromptLength { length: usize, max: usize },

    #[error("image count {requested} is outside 1..={max}")]
    ImageCount { requested: u32, max: u32 },

    #[error("{field} must be a positive integer")]
    NonPositiveDimension { field: String },
}

/// Category of an adapter failure; drives retry and backoff decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Network,
    Auth,
    RateLimited,
    InvalidRequest,
    ProviderFault,
}

impl AdapterErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::ProviderFault)
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::InvalidRequest => "invalid_request",
            Self::ProviderFault => "provider_fault",
        };
        f.write_str(label)
    }
}

/// Failure raised by a provider adapter.
///
/// `cause` carries the raw provider detail (status code, error code or
/// message) as an opaque string.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {cause}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub cause: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn network(cause: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Network, cause)
    }

    pub fn auth(cause: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Auth, cause)
    }

    pub fn rate_limited(cause: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::RateLimited, cause)
    }

    pub fn invalid_request(cause: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::InvalidRequest, cause)
    }

    pub fn provider_fault(cause: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::ProviderFault, cause)
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Structured cause recorded on a job that ended `Failed` or `TimedOut`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    #[error("adapter error: {0}")]
    Adapter(AdapterError),

    #[error("provider failed: {reason}")]
    ProviderFailed { reason: String },

    #[error("timed out after {attempts} attempts ({elapsed_ms} ms)")]
    Timeout { attempts: u32, elapsed_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    /// Background work for the job stopped without reaching an outcome.
    #[error("internal failure: {reason}")]
    Internal { reason: String },
}

impl JobError {
    pub fn timeout(attempts: u32, elapsed: Duration) -> Self {
        Self::Timeout {
            attempts,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_retry_policy() {
        assert!(Error::from(AdapterError::network("reset")).is_retryable());
        assert!(Error::from(AdapterError::rate_limited("429")).is_retryable());
        assert!(Error::from(AdapterError::provider_fault("500")).is_retryable());
        assert!(!Error::from(AdapterError::auth("401")).is_retryable());
        assert!(!Error::from(AdapterError::invalid_request("400")).is_retryable());
    }

    #[test]
    fn test_validation_and_cancellation_are_final() {
        assert!(!Error::from(ValidationError::EmptyPrompt).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_job_error_converts_to_matching_variant() {
        let err: Error = JobError::timeout(5, Duration::from_millis(1500)).into();
        assert!(matches!(
            err,
            Error::Timeout {
                attempts: 5,
                elapsed_ms: 1500
            }
        ));

        let err: Error = JobError::Cancelled.into();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_adapter_error_display_includes_kind_and_cause() {
        let err = AdapterError::auth("API key rejected");
        assert_eq!(err.to_string(), "auth: API key rejected");
    }
}

//! Background status polling for asynchronous jobs.
//!
//! Each submitted job gets its own loop that waits with exponential backoff
//! and jitter, polls the adapter, and hands terminal outcomes to the
//! orchestrator. A shared semaphore caps how many polls are in flight across
//! all jobs. Polling stops as soon as the job's cancellation token fires,
//! which the orchestrator does whenever a job turns terminal.

use crate::error::{AdapterErrorKind, AdapterResult, JobError};
use crate::models::JobId;
use crate::orchestrator::{JobOrchestrator, JobState, Transition, TransitionOutcome};
use crate::provider::{PollOutcome, ProviderAdapter};
use crate::{Error, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

const MAX_JITTER: f64 = 0.99;

/// Tunable polling policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Wait before the first poll.
    pub initial_delay: Duration,
    /// Upper bound on the backoff between polls.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each poll.
    pub multiplier: f64,
    /// Fractional spread applied to each delay, in `[0, 1)`.
    pub jitter: f64,
    /// Poll attempts before the job times out.
    pub max_attempts: u32,
    /// Wall-clock budget from submission acceptance.
    pub deadline: Duration,
    /// Extra wait added after a rate-limited poll.
    pub rate_limit_extension: Duration,
    pub max_concurrent_polls: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 30,
            deadline: Duration::from_secs(300),
            rate_limit_extension: Duration::from_secs(5),
            max_concurrent_polls: 16,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(Error::Config(format!(
                "POLL_MULTIPLIER must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::Config(format!(
                "POLL_JITTER must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("POLL_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if self.max_concurrent_polls == 0 {
            return Err(Error::Config(
                "MAX_CONCURRENT_POLLS must be at least 1".to_string(),
            ));
        }
        if self.deadline.is_zero() {
            return Err(Error::Config("POLL_DEADLINE_SECS must be positive".to_string()));
        }
        Ok(())
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`PollConfig::max_delay`].
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Spread `delay` uniformly by `±jitter`.
///
/// `jitter` is capped below 1 so the factor stays positive.
pub fn apply_jitter<R: Rng>(delay: Duration, jitter: f64, rng: &mut R) -> Duration {
    if jitter.is_nan() || jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(MAX_JITTER);
    let factor = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}

#[derive(Clone)]
pub struct PollingEngine {
    config: Arc<PollConfig>,
    permits: Arc<Semaphore>,
}

impl PollingEngine {
    pub fn new(config: PollConfig) -> Result<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_polls));
        Ok(Self {
            config: Arc::new(config),
            permits,
        })
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Start the poll loop for a `Submitted` job.
    ///
    /// `elapsed` is time already spent since submission was accepted, so a
    /// resumed job keeps its original deadline. If the loop panics or is
    /// aborted the job is failed instead of being left `Submitted`.
    pub fn spawn(
        &self,
        orchestrator: JobOrchestrator,
        job_id: JobId,
        adapter: Arc<dyn ProviderAdapter>,
        provider_generation_id: String,
        cancel: CancellationToken,
        elapsed: Duration,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        let poller = tokio::spawn(engine.run(
            orchestrator.clone(),
            job_id,
            adapter,
            provider_generation_id,
            cancel,
            elapsed,
        ));

        tokio::spawn(async move {
            let Err(e) = poller.await else {
                return;
            };
            tracing::error!(%job_id, error = %e, "Poll task ended abnormally");
            let error = JobError::Internal {
                reason: format!("polling stopped unexpectedly: {}", e),
            };
            match orchestrator
                .transition(job_id, JobState::Submitted, Transition::Failed(error))
                .await
            {
                Ok(_) => {}
                Err(e) => tracing::error!(%job_id, error = %e, "Failed to fail stranded job"),
            }
        })
    }

    async fn run(
        self,
        orchestrator: JobOrchestrator,
        job_id: JobId,
        adapter: Arc<dyn ProviderAdapter>,
        provider_generation_id: String,
        cancel: CancellationToken,
        elapsed: Duration,
    ) {
        let resumed_at = Instant::now();
        let deadline = resumed_at + self.config.deadline.saturating_sub(elapsed);
        let spent = || elapsed + resumed_at.elapsed();
        let mut delay = self.config.initial_delay;
        let mut extension = Duration::ZERO;

        tracing::debug!(
            %job_id,
            provider = %adapter.kind(),
            provider_generation_id = %provider_generation_id,
            "Polling started",
        );

        loop {
            let wait = {
                let mut rng = rand::thread_rng();
                apply_jitter(delay, self.config.jitter, &mut rng)
            } + extension;
            let wake_at = (Instant::now() + wait).min(deadline);
            tracing::debug!(%job_id, delay_ms = wait.as_millis() as u64, "Next poll scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(%job_id, "Polling stopped: job resolved elsewhere");
                    return;
                }
                _ = sleep_until(wake_at) => {}
            }

            if Instant::now() >= deadline {
                self.time_out(&orchestrator, job_id, spent()).await;
                return;
            }

            let attempt = match orchestrator.record_poll_attempt(job_id).await {
                Ok(Some(attempt)) => attempt,
                Ok(None) => {
                    tracing::debug!(%job_id, "Polling stopped: job no longer submitted");
                    return;
                }
                Err(e) => {
                    tracing::error!(%job_id, error = %e, "Polling stopped: job lookup failed");
                    return;
                }
            };

            let polled = tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep_until(deadline) => {
                    self.time_out(&orchestrator, job_id, spent()).await;
                    return;
                }
                polled = self.poll_once(adapter.as_ref(), &provider_generation_id) => polled,
            };

            extension = Duration::ZERO;
            match polled {
                Ok(PollOutcome::StillPending) => {
                    tracing::debug!(%job_id, attempt, "Generation still pending");
                }
                Ok(PollOutcome::Completed(result)) => {
                    self.resolve(&orchestrator, job_id, Transition::Completed(result))
                        .await;
                    return;
                }
                Ok(PollOutcome::ProviderFailed(reason)) => {
                    let error = JobError::ProviderFailed { reason };
                    self.resolve(&orchestrator, job_id, Transition::Failed(error))
                        .await;
                    return;
                }
                Err(e) if e.kind == AdapterErrorKind::RateLimited => {
                    tracing::warn!(
                        %job_id,
                        attempt,
                        error = %e,
                        "Poll rate limited, extending next delay",
                    );
                    extension = self.config.rate_limit_extension;
                }
                Err(e) => {
                    tracing::warn!(%job_id, attempt, error = %e, "Poll attempt failed");
                }
            }

            if attempt >= self.config.max_attempts {
                self.time_out(&orchestrator, job_id, spent()).await;
                return;
            }

            delay = next_delay(delay, &self.config);
        }
    }

    async fn poll_once(
        &self,
        adapter: &dyn ProviderAdapter,
        provider_generation_id: &str,
    ) -> AdapterResult<PollOutcome> {
        let _permit = self.permits.acquire().await.map_err(|_| {
            crate::error::AdapterError::provider_fault("poll permits closed")
        })?;
        adapter.poll_status(provider_generation_id).await
    }

    async fn resolve(&self, orchestrator: &JobOrchestrator, job_id: JobId, transition: Transition) {
        match orchestrator
            .transition(job_id, JobState::Submitted, transition)
            .await
        {
            Ok(TransitionOutcome::Applied(state)) => {
                tracing::info!(%job_id, %state, "Job resolved by polling");
            }
            Ok(TransitionOutcome::Rejected { current }) => {
                tracing::debug!(%job_id, %current, "Poll result discarded: job already resolved");
            }
            Err(e) => tracing::error!(%job_id, error = %e, "Failed to apply poll result"),
        }
    }

    async fn time_out(&self, orchestrator: &JobOrchestrator, job_id: JobId, elapsed: Duration) {
        let transition = Transition::TimedOut { elapsed };
        match orchestrator
            .transition(job_id, JobState::Submitted, transition)
            .await
        {
            Ok(TransitionOutcome::Applied(_)) => {
                tracing::warn!(
                    %job_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job timed out waiting for provider",
                );
            }
            Ok(TransitionOutcome::Rejected { .. }) => {}
            Err(e) => tracing::error!(%job_id, error = %e, "Failed to time out job"),
        }
    }
}

//! Job orchestration.
//!
//! [`JobOrchestrator`] owns every job's lifecycle: it maps the request,
//! submits through the provider adapter, and for asynchronous providers
//! races the polling engine against webhook delivery. All state changes go
//! through [`JobOrchestrator::transition`], a compare-and-set on the job's
//! current state, so exactly one completion source wins and late arrivals
//! are discarded.

mod job;

pub use job::{Job, JobState, Transition};

use crate::error::{AdapterError, JobError};
use crate::mapper::{self, MappingWarning, ProviderPayload};
use crate::models::{GenerationRequest, GenerationResult, JobId, ProviderKind};
use crate::polling::{PollConfig, PollingEngine};
use crate::provider::{ProviderAdapter, ProviderCapability, SubmitOutcome};
use crate::store::JobStore;
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RETRY_BASE_MS: u64 = 2;
const RETRY_FACTOR: u64 = 250;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// How long a terminal job stays in memory after it has been persisted.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(300);

/// Providers tried, in order, when a request names none.
const PROVIDER_PREFERENCE: [ProviderKind; 3] = [
    ProviderKind::Leonardo,
    ProviderKind::Runware,
    ProviderKind::Gemini,
];

/// Result of a compare-and-set transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(JobState),
    /// The job was no longer in the expected state; nothing changed.
    Rejected { current: JobState },
}

/// Handle returned by [`JobOrchestrator::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobTicket {
    pub job_id: JobId,
    pub warnings: Vec<MappingWarning>,
}

struct JobCell {
    job: Mutex<Job>,
    state: watch::Sender<JobState>,
    /// Fired when the job turns terminal; stops its submission and poll tasks.
    cancel: CancellationToken,
}

impl JobCell {
    fn new(job: Job) -> Arc<Self> {
        let (state, _) = watch::channel(job.state);
        let cancel = CancellationToken::new();
        if job.is_terminal() {
            cancel.cancel();
        }
        Arc::new(Self {
            job: Mutex::new(job),
            state,
            cancel,
        })
    }
}

struct Inner {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    store: Arc<dyn JobStore>,
    jobs: DashMap<JobId, Arc<JobCell>>,
    generations: DashMap<(ProviderKind, String), JobId>,
    polling: PollingEngine,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
    retention: Duration,
}

impl JobOrchestrator {
    /// Fails with [`Error::Config`] when `poll_config` does not validate.
    pub fn new(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        store: Arc<dyn JobStore>,
        poll_config: PollConfig,
    ) -> Result<Self> {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                adapters,
                store,
                jobs: DashMap::new(),
                generations: DashMap::new(),
                polling: PollingEngine::new(poll_config)?,
            }),
            retention: DEFAULT_JOB_RETENTION,
        })
    }

    /// Keep terminal jobs in memory for `retention` before evicting them.
    /// Evicted jobs are still readable through the store.
    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn adapter(&self, provider: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        self.inner
            .adapters
            .get(&provider)
            .cloned()
            .ok_or(Error::ProviderNotConfigured(provider))
    }

    /// Capability descriptors of every registered provider, by name.
    pub fn capabilities(&self) -> Vec<ProviderCapability> {
        let mut capabilities: Vec<_> = self
            .inner
            .adapters
            .values()
            .map(|adapter| adapter.capability().clone())
            .collect();
        capabilities.sort_by_key(|capability| capability.provider.as_str());
        capabilities
    }

    /// The requested provider if it is registered, otherwise the first
    /// registered one in the order Leonardo, Runware, Gemini.
    pub fn select_provider(&self, requested: Option<ProviderKind>) -> Result<ProviderKind> {
        if let Some(provider) = requested {
            return self.adapter(provider).map(|_| provider);
        }
        PROVIDER_PREFERENCE
            .into_iter()
            .find(|provider| self.inner.adapters.contains_key(provider))
            .ok_or_else(|| Error::Config("No image generation provider configured".to_string()))
    }

    /// Validate and map `request`, record a `Pending` job and start
    /// submission in the background.
    ///
    /// Validation failures are returned here and create no job.
    pub async fn submit(
        &self,
        provider: ProviderKind,
        request: GenerationRequest,
    ) -> Result<JobTicket> {
        let adapter = self.adapter(provider)?;
        let mapped = mapper::map_request(&request, adapter.capability())?;
        let mechanism = adapter.capability().mechanism;

        for warning in &mapped.warnings {
            warn!(provider = %provider, %warning, "Request adjusted for provider");
        }

        let job = Job::new(provider, mechanism, request, mapped.warnings.clone());
        let job_id = job.id;
        self.inner.store.save(&job).await?;

        let cell = JobCell::new(job);
        let cancel = cell.cancel.clone();
        self.inner.jobs.insert(job_id, cell);
        info!(%job_id, provider = %provider, ?mechanism, "Job created");

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator
                .drive_submission(job_id, adapter, mapped.payload, cancel)
                .await;
        });

        Ok(JobTicket {
            job_id,
            warnings: mapped.warnings,
        })
    }

    /// Block until the job is terminal and return its final record.
    pub async fn wait(&self, job_id: JobId) -> Result<Job> {
        let cell = self.cell_or_adopt(job_id).await?;
        {
            let mut state = cell.state.subscribe();
            state
                .wait_for(|state| state.is_terminal())
                .await
                .map_err(|_| Error::Invariant(format!("state channel closed for job {}", job_id)))?;
        }
        let job = cell.job.lock().await.clone();
        Ok(job)
    }

    /// Submit and wait for the outcome.
    pub async fn generate(
        &self,
        provider: ProviderKind,
        request: GenerationRequest,
    ) -> Result<GenerationResult> {
        let ticket = self.submit(provider, request).await?;
        self.wait(ticket.job_id).await?.outcome()
    }

    /// [`generate`](Self::generate) on the provider chosen by
    /// [`select_provider`](Self::select_provider).
    pub async fn generate_auto(
        &self,
        provider: Option<ProviderKind>,
        request: GenerationRequest,
    ) -> Result<GenerationResult> {
        let provider = self.select_provider(provider)?;
        self.generate(provider, request).await
    }

    /// Generate every request with at most `max_concurrency` in flight.
    ///
    /// Results come back in input order; one request failing does not stop
    /// the others.
    pub async fn generate_batch(
        &self,
        requests: Vec<GenerationRequest>,
        provider: Option<ProviderKind>,
        max_concurrency: usize,
    ) -> Vec<Result<GenerationResult>> {
        let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
        info!(
            count = requests.len(),
            max_concurrency,
            "Starting batch generation"
        );

        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let orchestrator = self.clone();
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| Error::Invariant("batch permits closed".to_string()))?;
                    orchestrator.generate_auto(provider, request).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap_or_else(|e| {
                Err(Error::Invariant(format!("batch request {} aborted: {}", index, e)))
            });
            if let Err(e) = &result {
                warn!(index, error = %e, "Batch request failed");
            }
            results.push(result);
        }
        results
    }

    /// [`generate`](Self::generate) with up to `max_attempts` fresh jobs,
    /// backing off exponentially between retryable failures.
    pub async fn generate_with_retry(
        &self,
        provider: ProviderKind,
        request: GenerationRequest,
        max_attempts: usize,
    ) -> Result<GenerationResult> {
        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_MS)
            .factor(RETRY_FACTOR)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(max_attempts.saturating_sub(1));

        RetryIf::spawn(
            strategy,
            || {
                let request = request.clone();
                async move {
                    self.generate(provider, request).await.inspect_err(|e| {
                        warn!(provider = %provider, error = %e, "Generation attempt failed");
                    })
                }
            },
            |e: &Error| e.is_retryable(),
        )
        .await
    }

    /// Try each provider in order, returning the first success or the last
    /// error. A cancellation stops the chain.
    pub async fn generate_with_fallback(
        &self,
        providers: &[ProviderKind],
        request: GenerationRequest,
    ) -> Result<GenerationResult> {
        let mut last_error = None;
        for &provider in providers {
            match self.generate(provider, request.clone()).await {
                Ok(result) => return Ok(result),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::Config("No providers given for fallback".to_string())))
    }

    /// Mark a non-terminal job `Failed(Cancelled)` and stop its background
    /// work. Nothing is sent to the provider.
    pub async fn cancel(&self, job_id: JobId) -> Result<TransitionOutcome> {
        let cell = self.cell_or_adopt(job_id).await?;
        let mut job = cell.job.lock().await;
        if job.is_terminal() {
            return Ok(TransitionOutcome::Rejected { current: job.state });
        }

        let state = self
            .commit(&cell, &mut job, Transition::Failed(JobError::Cancelled))
            .await?;
        info!(%job_id, "Job cancelled");
        Ok(TransitionOutcome::Applied(state))
    }

    /// Snapshot of a job, falling back to the store for jobs this process
    /// does not hold.
    pub async fn job(&self, job_id: JobId) -> Result<Job> {
        if let Ok(cell) = self.cell(job_id) {
            return Ok(cell.job.lock().await.clone());
        }
        self.inner
            .store
            .load(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Move `job_id` from `expected` to the transition's target state.
    ///
    /// Returns `Rejected` without side effects when the job has already left
    /// `expected`. Pairs the state machine never allows fail with
    /// [`Error::InvalidTransition`].
    pub async fn transition(
        &self,
        job_id: JobId,
        expected: JobState,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        let target = transition.target();
        if !expected.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                job_id,
                from: expected,
                to: target,
            });
        }

        let cell = self.cell_or_adopt(job_id).await?;
        let mut job = cell.job.lock().await;
        if job.state != expected {
            debug!(
                %job_id,
                %expected,
                current = %job.state,
                requested = %target,
                "Transition rejected: state already changed",
            );
            return Ok(TransitionOutcome::Rejected { current: job.state });
        }

        let state = self.commit(&cell, &mut job, transition).await?;
        info!(%job_id, provider = %job.provider, %state, "Job transitioned");
        Ok(TransitionOutcome::Applied(state))
    }

    /// Count and persist one poll attempt. `None` once the job has left
    /// `Submitted`.
    pub async fn record_poll_attempt(&self, job_id: JobId) -> Result<Option<u32>> {
        let cell = self.cell(job_id)?;
        let mut job = cell.job.lock().await;
        if job.state != JobState::Submitted {
            return Ok(None);
        }
        job.attempts += 1;
        if let Err(e) = self.inner.store.save(&job).await {
            warn!(%job_id, attempts = job.attempts, error = %e, "Failed to persist poll attempt");
        }
        Ok(Some(job.attempts))
    }

    /// Resolve a provider-side id to a job, consulting the store when the
    /// job is not held in memory. Stored jobs are adopted into this process.
    pub async fn find_by_provider_generation_id(
        &self,
        provider: ProviderKind,
        provider_generation_id: &str,
    ) -> Result<Option<JobId>> {
        let key = (provider, provider_generation_id.to_string());
        if let Some(job_id) = self.inner.generations.get(&key).map(|entry| *entry.value()) {
            return Ok(Some(job_id));
        }

        let stored = self
            .inner
            .store
            .load_by_provider_generation_id(provider, provider_generation_id)
            .await?;
        Ok(stored.map(|job| {
            let job_id = job.id;
            self.adopt(job);
            job_id
        }))
    }

    fn cell(&self, job_id: JobId) -> Result<Arc<JobCell>> {
        self.inner
            .jobs
            .get(&job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::JobNotFound(job_id))
    }

    /// In-memory cell for `job_id`, adopting the stored job when this
    /// process no longer holds it.
    async fn cell_or_adopt(&self, job_id: JobId) -> Result<Arc<JobCell>> {
        if let Ok(cell) = self.cell(job_id) {
            return Ok(cell);
        }
        let job = self
            .inner
            .store
            .load(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        Ok(self.adopt(job))
    }

    /// Apply a transition already checked against the current state, then
    /// index, persist and publish it.
    async fn commit(&self, cell: &JobCell, job: &mut Job, transition: Transition) -> Result<JobState> {
        let state = job
            .apply(transition)
            .map_err(|(from, to)| Error::InvalidTransition {
                job_id: job.id,
                from,
                to,
            })?;

        if state == JobState::Submitted {
            if let Some(generation_id) = &job.provider_generation_id {
                self.inner
                    .generations
                    .insert((job.provider, generation_id.clone()), job.id);
            }
        }

        let persisted = match self.inner.store.save(job).await {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = %job.id, %state, error = %e, "Failed to persist job transition");
                false
            }
        };

        cell.state.send_replace(state);
        if state.is_terminal() {
            cell.cancel.cancel();
            // An unsaved outcome would be lost on eviction.
            if persisted {
                self.schedule_eviction(job.id, generation_key(job));
            }
        }
        Ok(state)
    }

    /// Drop a terminal job and its generation-index entry from memory once
    /// the retention window has passed.
    fn schedule_eviction(&self, job_id: JobId, generation: Option<(ProviderKind, String)>) {
        let inner = Arc::downgrade(&self.inner);
        let retention = self.retention;

        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.jobs.remove(&job_id);
            if let Some(key) = generation {
                inner.generations.remove_if(&key, |_, owner| *owner == job_id);
            }
            debug!(%job_id, "Terminal job evicted from memory");
        });
    }

    /// Register a job loaded from the store.
    ///
    /// Submitted jobs resume polling with whatever attempts and time they
    /// have already used. Terminal jobs are evicted again after retention.
    fn adopt(&self, job: Job) -> Arc<JobCell> {
        let job_id = job.id;
        let provider = job.provider;
        let state = job.state;
        let generation_id = job.provider_generation_id.clone();
        let elapsed = (chrono::Utc::now() - job.updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let terminal = job.is_terminal();
        let generation = generation_key(&job);

        let cell = JobCell::new(job);
        match self.inner.jobs.entry(job_id) {
            Entry::Occupied(existing) => return Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cell));
            }
        }
        info!(%job_id, provider = %provider, %state, "Job adopted from store");

        if terminal {
            self.schedule_eviction(job_id, generation);
        }

        let Some(generation_id) = generation_id else {
            return cell;
        };
        self.inner
            .generations
            .insert((provider, generation_id.clone()), job_id);

        if state == JobState::Submitted {
            match self.adapter(provider) {
                Ok(adapter) => {
                    self.inner.polling.spawn(
                        self.clone(),
                        job_id,
                        adapter,
                        generation_id,
                        cell.cancel.clone(),
                        elapsed,
                    );
                }
                Err(e) => warn!(%job_id, error = %e, "Adopted job cannot resume polling"),
            }
        }
        cell
    }

    async fn drive_submission(
        self,
        job_id: JobId,
        adapter: Arc<dyn ProviderAdapter>,
        payload: ProviderPayload,
        cancel: CancellationToken,
    ) {
        let provider = adapter.kind();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%job_id, "Submission abandoned: job already resolved");
                return;
            }
            outcome = adapter.submit(&payload) => outcome,
        };

        let mechanism = adapter.capability().mechanism;
        let transition = match outcome {
            Ok(SubmitOutcome::ImmediateResult(result)) if !mechanism.is_async() => {
                Transition::Completed(result)
            }
            Ok(SubmitOutcome::Accepted {
                provider_generation_id,
                cost,
            }) if mechanism.is_async() => Transition::Submitted {
                provider_generation_id,
                cost,
            },
            Ok(other) => {
                error!(%job_id, provider = %provider, ?mechanism, outcome = ?other, "Adapter outcome does not match its mechanism");
                Transition::Failed(JobError::Adapter(AdapterError::provider_fault(format!(
                    "{} returned an outcome inconsistent with {:?}",
                    provider, mechanism
                ))))
            }
            Err(e) => {
                warn!(%job_id, provider = %provider, error = %e, "Submission failed");
                Transition::Failed(JobError::Adapter(e))
            }
        };

        let generation_id = match &transition {
            Transition::Submitted {
                provider_generation_id,
                ..
            } => Some(provider_generation_id.clone()),
            _ => None,
        };

        match self.transition(job_id, JobState::Pending, transition).await {
            Ok(TransitionOutcome::Applied(JobState::Submitted)) => {
                if let Some(generation_id) = generation_id {
                    self.inner.polling.spawn(
                        self.clone(),
                        job_id,
                        adapter,
                        generation_id,
                        cancel,
                        Duration::ZERO,
                    );
                }
            }
            Ok(_) => {}
            Err(e) => error!(%job_id, error = %e, "Failed to record submission outcome"),
        }
    }
}

fn generation_key(job: &Job) -> Option<(ProviderKind, String)> {
    job.provider_generation_id
        .clone()
        .map(|generation_id| (job.provider, generation_id))
}

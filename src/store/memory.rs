use super::JobStore;
use crate::models::{JobId, ProviderKind};
use crate::orchestrator::{Job, JobState};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-local [`JobStore`] that also records every save it sees.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
    history: Arc<Mutex<Vec<(JobId, JobState)>>>,
    fail_saves: Arc<Mutex<bool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, as if written by an earlier process.
    pub fn with_job(self, job: Job) -> Self {
        lock(&self.jobs).insert(job.id, job);
        self
    }

    /// Make every subsequent save fail with [`Error::Store`].
    pub fn fail_saves(&self, fail: bool) {
        *lock(&self.fail_saves) = fail;
    }

    pub fn save_count(&self) -> usize {
        lock(&self.history).len()
    }

    /// States written for `job_id`, oldest first.
    pub fn saved_states(&self, job_id: JobId) -> Vec<JobState> {
        lock(&self.history)
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn get(&self, job_id: JobId) -> Option<Job> {
        lock(&self.jobs).get(&job_id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        if *lock(&self.fail_saves) {
            return Err(Error::Store(format!("save rejected for job {}", job.id)));
        }

        lock(&self.history).push((job.id, job.state));
        lock(&self.jobs).insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, job_id: JobId) -> Result<Option<Job>> {
        Ok(self.get(job_id))
    }

    async fn load_by_provider_generation_id(
        &self,
        provider: ProviderKind,
        provider_generation_id: &str,
    ) -> Result<Option<Job>> {
        Ok(lock(&self.jobs)
            .values()
            .find(|job| {
                job.provider == provider
                    && job.provider_generation_id.as_deref() == Some(provider_generation_id)
            })
            .cloned())
    }
}

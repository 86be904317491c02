//! Durable job records.
//!
//! The orchestrator writes through a [`JobStore`] on every state transition
//! and reads back from it to recognize jobs it no longer holds in memory.

pub mod memory;

pub use memory::MemoryJobStore;

use crate::models::{JobId, ProviderKind};
use crate::orchestrator::Job;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the record for `job.id`.
    async fn save(&self, job: &Job) -> Result<()>;
    async fn load(&self, job_id: JobId) -> Result<Option<Job>>;
    async fn load_by_provider_generation_id(
        &self,
        provider: ProviderKind,
        provider_generation_id: &str,
    ) -> Result<Option<Job>>;
}

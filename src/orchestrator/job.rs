use crate::error::JobError;
use crate::mapper::MappingWarning;
use crate::models::{GenerationRequest, GenerationResult, JobId, Mechanism, ProviderKind};
use crate::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a job.
///
/// `Pending -> Submitted | Completed | Failed`,
/// `Submitted -> Completed | Failed | TimedOut`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Submitted,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Submitted, Completed)
                | (Submitted, Failed)
                | (Submitted, TimedOut)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// A requested state change together with the data it records.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Submitted {
        provider_generation_id: String,
        cost: Option<f64>,
    },
    Completed(GenerationResult),
    Failed(JobError),
    TimedOut {
        elapsed: Duration,
    },
}

impl Transition {
    pub fn target(&self) -> JobState {
        match self {
            Self::Submitted { .. } => JobState::Submitted,
            Self::Completed(_) => JobState::Completed,
            Self::Failed(_) => JobState::Failed,
            Self::TimedOut { .. } => JobState::TimedOut,
        }
    }
}

/// One generation attempt against one provider.
///
/// `result` is set exactly when the state is `Completed`; `error` exactly
/// when it is `Failed` or `TimedOut`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub provider: ProviderKind,
    pub mechanism: Mechanism,
    pub state: JobState,
    pub provider_generation_id: Option<String>,
    pub request: GenerationRequest,
    pub warnings: Vec<MappingWarning>,
    pub result: Option<GenerationResult>,
    pub error: Option<JobError>,
    pub submission_cost: Option<f64>,
    /// Poll attempts made so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        provider: ProviderKind,
        mechanism: Mechanism,
        request: GenerationRequest,
        warnings: Vec<MappingWarning>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            provider,
            mechanism,
            state: JobState::Pending,
            provider_generation_id: None,
            request,
            warnings,
            result: None,
            error: None,
            submission_cost: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply `transition` if the state machine allows it from the current
    /// state. Returns the rejected `(from, to)` pair otherwise.
    pub(crate) fn apply(&mut self, transition: Transition) -> Result<JobState, (JobState, JobState)> {
        let next = transition.target();
        if !self.state.can_transition_to(next) {
            return Err((self.state, next));
        }

        match transition {
            Transition::Submitted {
                provider_generation_id,
                cost,
            } => {
                self.provider_generation_id = Some(provider_generation_id);
                self.submission_cost = cost;
            }
            Transition::Completed(result) => {
                self.result = Some(normalize::merge_submission_cost(
                    result,
                    self.submission_cost,
                ));
            }
            Transition::Failed(error) => self.error = Some(error),
            Transition::TimedOut { elapsed } => {
                self.error = Some(JobError::timeout(self.attempts, elapsed));
            }
        }

        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(next)
    }

    /// Final outcome of a terminal job.
    pub fn outcome(&self) -> crate::Result<GenerationResult> {
        match (self.state, &self.result, &self.error) {
            (JobState::Completed, Some(result), _) => Ok(result.clone()),
            (_, _, Some(error)) => Err(error.clone().into()),
            (state, _, _) => Err(crate::Error::Invariant(format!(
                "job {} in state {} has no outcome",
                self.id, state
            ))),
        }
    }
}

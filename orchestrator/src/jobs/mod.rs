//! Job persistence and the lifecycle operations the pipeline drives.

mod memory;

pub use memory::InMemoryJobStore;

use async_trait::async_trait;
use shared_types::{Job, JobStatus, JobType, JsonMap, LifecycleError};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found")]
    NotFound,
    #[error("job already started")]
    AlreadyStarted,
    #[error("job is not running")]
    NotRunning,
    #[error("invalid job status: {0}")]
    InvalidStatus(JobStatus),
    #[error("invalid job: {0}")]
    Invalid(String),
    #[error("job store error: {0}")]
    Backend(String),
}

impl From<LifecycleError> for JobError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::AlreadyStarted => JobError::AlreadyStarted,
            LifecycleError::NotRunning => JobError::NotRunning,
            LifecycleError::InvalidStatus(status) => JobError::InvalidStatus(status),
            other => JobError::Invalid(other.to_string()),
        }
    }
}

/// Narrow field mutation, outside the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSetter {
    Status(JobStatus),
    Config(JsonMap),
    Result(JsonMap),
}

impl JobSetter {
    pub fn apply(self, job: &mut Job) -> Result<(), JobError> {
        match self {
            JobSetter::Status(status) => job.status = status,
            JobSetter::Config(config) => job.config = config,
            JobSetter::Result(result) => job.result = result,
        }
        Ok(())
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, JobError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Job, JobError>;

    /// Apply `setters` in order; nothing is persisted if any of them fails.
    async fn update(&self, id: Uuid, setters: Vec<JobSetter>) -> Result<(), JobError>;

    /// Newest first.
    async fn list_by_creator(
        &self,
        created_by: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, JobError>;

    async fn count_by_creator(&self, created_by: Uuid) -> Result<usize, JobError>;

    /// Newest first.
    async fn list_by_type(
        &self,
        job_type: JobType,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, JobError>;

    /// Created -> Running.
    async fn start(&self, id: Uuid) -> Result<(), JobError>;

    /// Running -> `status`, merging `result` into the stored result.
    async fn complete(&self, id: Uuid, status: JobStatus, result: JsonMap)
        -> Result<(), JobError>;
}

use std::time::Duration;

use shared_types::JobStatus;

/// Fatal conditions of one exploration run.
///
/// Every variant ends the run through the pipeline's failure handler.
/// Artifact problems are not represented here: they are logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("failed to start job: {0}")]
    Lifecycle(String),
    #[error("failed to create scratch workspace: {0}")]
    Workspace(String),
    #[error("agent subprocess failed: {0}")]
    ProcessFailure(String),
    #[error("failed to read agent result: {0}")]
    DecodeFailure(String),
    #[error("{0}")]
    Persistence(String),
    #[error("stopped by user")]
    Cancelled,
    #[error("exploration timed out after {0:?}")]
    TimedOut(Duration),
}

impl PipelineError {
    /// Terminal status a job takes when its run ends with this error.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            PipelineError::Cancelled => JobStatus::Stopped,
            _ => JobStatus::Failed,
        }
    }
}

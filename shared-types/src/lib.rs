//! Shared types for the exploration orchestrator
//!
//! These records are used by:
//! - the job pipeline (lifecycle, worker hand-off, persistence)
//! - the persistence collaborators that store them
//!
//! Serializable with serde for JSON storage and for the worker process contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form JSON object used for job configuration and results.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Running,
    Success,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Success, Failed and Stopped are final; no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    UiExploration,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::UiExploration => write!(f, "ui_exploration"),
        }
    }
}

/// Errors raised by the job state machine and record validation.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("job already started")]
    AlreadyStarted,
    #[error("job is not running")]
    NotRunning,
    #[error("invalid job status: {0}")]
    InvalidStatus(JobStatus),
    #[error("created_by is required")]
    MissingCreator,
}

/// Persisted unit of asynchronous work.
///
/// Jobs are append-mostly: the pipeline moves them through
/// `Created -> Running -> {Success, Failed, Stopped}` and never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub config: JsonMap,
    pub result: JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between start and end; only set once `end_time` is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: JobType, created_by: Uuid, config: JsonMap) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Created,
            config,
            result: JsonMap::new(),
            start_time: None,
            end_time: None,
            duration_ms: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.created_by.is_nil() {
            return Err(LifecycleError::MissingCreator);
        }
        Ok(())
    }

    /// Created -> Running.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if self.status != JobStatus::Created {
            return Err(LifecycleError::AlreadyStarted);
        }
        self.status = JobStatus::Running;
        self.start_time = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Running -> terminal status. The given result is merged into the
    /// existing result map.
    pub fn complete(
        &mut self,
        status: JobStatus,
        result: JsonMap,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if self.status != JobStatus::Running {
            return Err(LifecycleError::NotRunning);
        }
        if !status.is_terminal() {
            return Err(LifecycleError::InvalidStatus(status));
        }
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = self
            .start_time
            .map(|start| (now - start).num_milliseconds());
        self.result.extend(result);
        self.updated_at = now;
        Ok(())
    }
}

// ============================================================================
// Endpoints
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub value: String,
}

/// Target application an exploration job runs against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub credentials: Vec<Credential>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EndpointValidationError {
    #[error("endpoint name is required")]
    MissingName,
    #[error("endpoint URL is required")]
    MissingUrl,
    #[error("created_by is required")]
    MissingCreator,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        credentials: Vec<Credential>,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            credentials,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), EndpointValidationError> {
        if self.name.trim().is_empty() {
            return Err(EndpointValidationError::MissingName);
        }
        if self.url.trim().is_empty() {
            return Err(EndpointValidationError::MissingUrl);
        }
        if self.created_by.is_nil() {
            return Err(EndpointValidationError::MissingCreator);
        }
        Ok(())
    }
}

// ============================================================================
// Test Procedures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestStep {
    pub name: String,
    pub instructions: String,
    #[serde(default)]
    pub image_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestProcedure {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: String,
    pub steps: Vec<TestStep>,
    pub created_by: Uuid,
    pub version: u32,
    pub is_latest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProcedureValidationError {
    #[error("test procedure name is required")]
    MissingName,
    #[error("project_id is required")]
    MissingProject,
    #[error("created_by is required")]
    MissingCreator,
    #[error("step {0}: step name is required")]
    MissingStepName(usize),
}

impl TestProcedure {
    /// New, latest, unversioned procedure.
    pub fn new(
        project_id: Uuid,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<TestStep>,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            description: description.into(),
            steps,
            created_by,
            version: 0,
            is_latest: true,
            parent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), ProcedureValidationError> {
        if self.name.trim().is_empty() {
            return Err(ProcedureValidationError::MissingName);
        }
        if self.project_id.is_nil() {
            return Err(ProcedureValidationError::MissingProject);
        }
        if self.created_by.is_nil() {
            return Err(ProcedureValidationError::MissingCreator);
        }
        if let Some(index) = self.steps.iter().position(|s| s.name.trim().is_empty()) {
            return Err(ProcedureValidationError::MissingStepName(index + 1));
        }
        Ok(())
    }
}

// ============================================================================
// Worker Hand-off
// ============================================================================

/// Result document version this build understands.
pub const WORKER_RESULT_SCHEMA_VERSION: u32 = 1;

/// File the worker writes inside its scratch workspace before exiting.
pub const WORKER_RESULT_FILE: &str = "result.json";

/// Document delivered to the worker process on stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplorationConfig {
    pub target_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<Credential>,
    pub procedure_name: String,
    pub job_id: String,
    pub output_dir: String,
    pub playwright_mcp_url: String,
}

/// Document the worker leaves in `result.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkerResult {
    /// Absent in documents written before versioning; read as version 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub procedure_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<WorkerStep>,
    #[serde(default)]
    pub summary: String,
}

impl WorkerResult {
    pub fn schema_version(&self) -> u32 {
        self.schema_version.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkerStep {
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub image_paths: Vec<String>,
}

// ============================================================================
// Constants
// ============================================================================

/// Job config keys
pub const CONFIG_ENDPOINT_ID: &str = "endpoint_id";
pub const CONFIG_PROJECT_ID: &str = "project_id";
pub const CONFIG_PROCEDURE_NAME: &str = "procedure_name";

/// Job result keys
pub const RESULT_PROCEDURE_ID: &str = "procedure_id";
pub const RESULT_PROCEDURE_NAME: &str = "procedure_name";
pub const RESULT_STEPS_COUNT: &str = "steps_count";
pub const RESULT_ERROR: &str = "error";

/// Build the config map for an exploration job.
pub fn exploration_job_config(
    endpoint_id: Uuid,
    project_id: Uuid,
    procedure_name: Option<&str>,
) -> JsonMap {
    let mut config = JsonMap::new();
    config.insert(
        CONFIG_ENDPOINT_ID.to_string(),
        serde_json::Value::String(endpoint_id.to_string()),
    );
    config.insert(
        CONFIG_PROJECT_ID.to_string(),
        serde_json::Value::String(project_id.to_string()),
    );
    if let Some(name) = procedure_name {
        config.insert(
            CONFIG_PROCEDURE_NAME.to_string(),
            serde_json::Value::String(name.to_string()),
        );
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn running_job() -> Job {
        let mut job = Job::new(JobType::UiExploration, Uuid::new_v4(), JsonMap::new());
        job.start(Utc::now()).unwrap();
        job
    }

    #[test]
    fn test_start_is_not_idempotent() {
        let mut job = Job::new(JobType::UiExploration, Uuid::new_v4(), JsonMap::new());
        assert_eq!(job.status, JobStatus::Created);

        job.start(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.start_time.is_some());

        assert_eq!(job.start(Utc::now()), Err(LifecycleError::AlreadyStarted));
    }

    #[test]
    fn test_complete_records_end_time_and_duration() {
        let mut job = running_job();
        let started = job.start_time.unwrap();
        let finished = started + Duration::milliseconds(1500);

        job.complete(JobStatus::Success, JsonMap::new(), finished)
            .unwrap();

        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.end_time, Some(finished));
        assert_eq!(job.duration_ms, Some(1500));
    }

    #[test]
    fn test_complete_is_not_idempotent() {
        let mut job = running_job();
        job.complete(JobStatus::Failed, JsonMap::new(), Utc::now())
            .unwrap();
        let end_time = job.end_time;

        let err = job
            .complete(JobStatus::Success, JsonMap::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err, LifecycleError::NotRunning);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.end_time, end_time);
    }

    #[test]
    fn test_complete_requires_running() {
        let mut job = Job::new(JobType::UiExploration, Uuid::new_v4(), JsonMap::new());
        let err = job
            .complete(JobStatus::Stopped, JsonMap::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err, LifecycleError::NotRunning);
        assert!(job.end_time.is_none());
    }

    #[test]
    fn test_complete_rejects_non_terminal_status() {
        let mut job = running_job();
        let err = job
            .complete(JobStatus::Created, JsonMap::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err, LifecycleError::InvalidStatus(JobStatus::Created));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_complete_merges_result() {
        let mut job = running_job();
        job.result
            .insert("attempt".to_string(), serde_json::json!(1));

        let mut result = JsonMap::new();
        result.insert(RESULT_ERROR.to_string(), serde_json::json!("boom"));
        job.complete(JobStatus::Failed, result, Utc::now()).unwrap();

        assert_eq!(job.result.get("attempt"), Some(&serde_json::json!(1)));
        assert_eq!(job.result.get(RESULT_ERROR), Some(&serde_json::json!("boom")));
    }

    #[test]
    fn test_job_serialization() {
        let job = Job::new(JobType::UiExploration, Uuid::new_v4(), JsonMap::new());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "ui_exploration");
        assert_eq!(value["status"], "created");
        assert!(value.get("end_time").is_none());
    }

    #[test]
    fn test_job_requires_creator() {
        let job = Job::new(JobType::UiExploration, Uuid::nil(), JsonMap::new());
        assert_eq!(job.validate(), Err(LifecycleError::MissingCreator));
    }

    #[test]
    fn test_procedure_validation_names_bad_step() {
        let procedure = TestProcedure::new(
            Uuid::new_v4(),
            "Login flow",
            "",
            vec![
                TestStep {
                    name: "Open".to_string(),
                    instructions: "Open the page".to_string(),
                    image_paths: vec![],
                },
                TestStep {
                    name: " ".to_string(),
                    instructions: "Click".to_string(),
                    image_paths: vec![],
                },
            ],
            Uuid::new_v4(),
        );
        assert_eq!(
            procedure.validate(),
            Err(ProcedureValidationError::MissingStepName(2))
        );
    }

    #[test]
    fn test_worker_result_defaults() {
        let result: WorkerResult =
            serde_json::from_str(r#"{"steps":[{"name":"Landing"}],"summary":"done"}"#).unwrap();
        assert_eq!(result.schema_version(), 1);
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0].image_paths.is_empty());
        assert_eq!(result.summary, "done");
    }

    #[test]
    fn test_exploration_config_omits_empty_credentials() {
        let config = ExplorationConfig {
            target_url: "https://app.test".to_string(),
            credentials: vec![],
            procedure_name: "Login flow".to_string(),
            job_id: "job".to_string(),
            output_dir: "/tmp/agent-job".to_string(),
            playwright_mcp_url: "http://localhost:3000/sse".to_string(),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert!(value.get("credentials").is_none());
        assert_eq!(value["output_dir"], "/tmp/agent-job");
    }
}

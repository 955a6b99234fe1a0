//! Exploration job pipeline.
//!
//! One run per job, on its own task:
//!
//! ```text
//! register stop trigger
//!   -> load job + endpoint -> start job -> scratch workspace
//!   -> worker process -> result.json -> artifacts -> test procedure
//!   -> complete(Success)
//! ```
//!
//! Any fatal error goes through [`Pipeline::fail_job`], so every run that can
//! reach the job store leaves the job in a terminal status.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shared_types::{
    Endpoint, ExplorationConfig, Job, JobStatus, JsonMap, CONFIG_ENDPOINT_ID,
    CONFIG_PROCEDURE_NAME, CONFIG_PROJECT_ID, RESULT_ERROR,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactCollector;
use crate::endpoints::{EndpointError, EndpointStore};
use crate::error::PipelineError;
use crate::jobs::{JobError, JobSetter, JobStore};
use crate::persister::{PersistedProcedure, ResultPersister};
use crate::procedures::TestProcedureStore;
use crate::registry::{register_scoped, CancelRegistry};
use crate::scope::RunScope;
use crate::storage::BlobStorage;
use crate::worker::ExplorationWorker;
use crate::workspace::ScratchWorkspace;

pub const DEFAULT_PROCEDURE_NAME: &str = "UI Exploration";

const MAX_REASON_CHARS: usize = 1000;
const TRUNCATED_MARKER: &str = "... (truncated)";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Upper bound on one run, from registration to completion
    pub time_limit: Duration,
    /// Parent directory for per-job scratch workspaces
    pub scratch_dir: PathBuf,
    /// Browser automation server base URL; the worker gets `{base}/sse`
    pub playwright_mcp_url: String,
}

/// Fields decoded from `Job.config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorationRequest {
    pub endpoint_id: Uuid,
    pub project_id: Uuid,
    pub procedure_name: String,
}

impl ExplorationRequest {
    pub fn from_config(config: &JsonMap) -> Result<Self, PipelineError> {
        let procedure_name = config
            .get(CONFIG_PROCEDURE_NAME)
            .and_then(|v| v.as_str())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_PROCEDURE_NAME)
            .to_string();

        Ok(Self {
            endpoint_id: required_uuid(config, CONFIG_ENDPOINT_ID)?,
            project_id: required_uuid(config, CONFIG_PROJECT_ID)?,
            procedure_name,
        })
    }
}

fn required_uuid(config: &JsonMap, key: &str) -> Result<Uuid, PipelineError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Err(PipelineError::Validation(format!(
            "missing {key} in job config"
        ))),
        Some(serde_json::Value::String(raw)) => Uuid::parse_str(raw)
            .map_err(|e| PipelineError::Validation(format!("invalid {key}: {e}"))),
        Some(other) => Err(PipelineError::Validation(format!(
            "invalid {key}: expected a UUID string, got {other}"
        ))),
    }
}

/// Cut `reason` to at most 1000 characters, marking the cut.
pub fn truncate_reason(reason: &str) -> String {
    match reason.char_indices().nth(MAX_REASON_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATED_MARKER}", &reason[..cut]),
        None => reason.to_string(),
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    jobs: Arc<dyn JobStore>,
    endpoints: Arc<dyn EndpointStore>,
    worker: ExplorationWorker,
    collector: ArtifactCollector,
    persister: ResultPersister,
    registry: Arc<dyn CancelRegistry>,
    parent: Option<CancellationToken>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        jobs: Arc<dyn JobStore>,
        endpoints: Arc<dyn EndpointStore>,
        procedures: Arc<dyn TestProcedureStore>,
        storage: Arc<dyn BlobStorage>,
        worker: ExplorationWorker,
        registry: Arc<dyn CancelRegistry>,
    ) -> Self {
        Self {
            settings,
            jobs,
            endpoints,
            worker,
            collector: ArtifactCollector::new(storage),
            persister: ResultPersister::new(procedures),
            registry,
            parent: None,
        }
    }

    /// Every run also stops when `parent` is cancelled.
    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Run `job_id` on its own task.
    ///
    /// The returned handle resolves to the job's terminal status. A panic
    /// inside the run is caught here and the job is failed with
    /// "pipeline panicked".
    pub fn spawn(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<JobStatus> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let run = tokio::spawn({
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.run(job_id).await }
            });
            match run.await {
                Ok(status) => status,
                Err(e) => {
                    let reason = if e.is_panic() {
                        "pipeline panicked"
                    } else {
                        "pipeline task cancelled"
                    };
                    error!(%job_id, error = %e, "exploration run aborted");
                    pipeline
                        .fail_job(job_id, JobStatus::Failed, reason)
                        .await
                }
            }
        })
    }

    /// Ask the run for `job_id` to stop. `false` when no run is registered.
    pub fn stop(&self, job_id: Uuid) -> bool {
        let found = self.registry.request_stop(job_id);
        if found {
            info!(%job_id, "stop requested");
        } else {
            warn!(%job_id, "stop requested for job with no active run");
        }
        found
    }

    /// Poll until `job_id` is terminal and return the stored job.
    ///
    /// Once `interrupt` resolves the run is asked to stop. A queued job has
    /// no registered run yet, so the stop is retried on every poll until a
    /// run receives it.
    pub async fn wait_for_terminal<F>(
        &self,
        job_id: Uuid,
        interrupt: F,
        poll_interval: Duration,
    ) -> Result<Job, PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        let mut poll = tokio::time::interval(poll_interval);
        let mut interrupted = false;
        let mut delivered = false;

        loop {
            tokio::select! {
                _ = &mut interrupt, if !interrupted => {
                    info!(%job_id, "interrupt received, stopping job");
                    interrupted = true;
                    delivered = self.stop(job_id);
                }
                _ = poll.tick() => {
                    let current = self.load_job(job_id).await?;
                    if current.status.is_terminal() {
                        return Ok(current);
                    }
                    if interrupted && !delivered {
                        delivered = self.registry.request_stop(job_id);
                        if delivered {
                            info!(%job_id, "stop delivered to queued job");
                        }
                    }
                }
            }
        }
    }

    /// Execute one run to a terminal status.
    pub async fn run(&self, job_id: Uuid) -> JobStatus {
        let scope = match &self.parent {
            Some(parent) => RunScope::child_of(parent, self.settings.time_limit),
            None => RunScope::new(self.settings.time_limit),
        };
        let _registration = register_scoped(&self.registry, job_id, scope.token());

        info!(%job_id, time_limit_secs = self.settings.time_limit.as_secs(), "exploration run started");

        match self.execute(&scope, job_id).await {
            Ok(persisted) => {
                info!(
                    %job_id,
                    procedure_id = %persisted.id,
                    steps = persisted.steps_count,
                    "exploration job succeeded"
                );
                JobStatus::Success
            }
            Err(e) => {
                self.fail_job(job_id, e.terminal_status(), &e.to_string())
                    .await
            }
        }
    }

    async fn execute(
        &self,
        scope: &RunScope,
        job_id: Uuid,
    ) -> Result<PersistedProcedure, PipelineError> {
        let job = scope.run(self.load_job(job_id)).await?;
        let request = ExplorationRequest::from_config(&job.config)?;
        let endpoint = scope.run(self.load_endpoint(request.endpoint_id)).await?;

        scope
            .run(async {
                self.jobs
                    .start(job_id)
                    .await
                    .map_err(|e| PipelineError::Lifecycle(e.to_string()))
            })
            .await?;

        let workspace = ScratchWorkspace::create(&self.settings.scratch_dir, job_id)
            .map_err(|e| PipelineError::Workspace(e.to_string()))?;
        info!(%job_id, path = %workspace.path().display(), "scratch workspace created");

        let config = self.exploration_config(job_id, &endpoint, &request, &workspace);
        self.worker.run(scope, workspace.path(), &config).await?;

        let result = self.worker.read_result(scope, workspace.path()).await?;
        info!(
            %job_id,
            steps = result.steps.len(),
            schema_version = result.schema_version(),
            "agent result decoded"
        );

        let steps = self
            .collector
            .collect(scope, &workspace, request.project_id, result.steps.clone(), &result.summary)
            .await?;

        let persisted = scope
            .run(self.persister.persist(
                request.project_id,
                job.created_by,
                &request.procedure_name,
                &result,
                steps,
            ))
            .await?;

        if let Err(e) = self
            .jobs
            .complete(job_id, JobStatus::Success, persisted.summary())
            .await
        {
            error!(%job_id, procedure_id = %persisted.id, error = %e, "failed to complete job after persisting procedure");
            return Err(PipelineError::Persistence(format!("failed to complete job: {e}")));
        }

        Ok(persisted)
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Job, PipelineError> {
        self.jobs.get_by_id(job_id).await.map_err(|e| match e {
            JobError::NotFound => PipelineError::NotFound(format!("job {job_id} not found")),
            other => PipelineError::Persistence(format!("failed to load job: {other}")),
        })
    }

    async fn load_endpoint(&self, endpoint_id: Uuid) -> Result<Endpoint, PipelineError> {
        self.endpoints
            .get_by_id(endpoint_id)
            .await
            .map_err(|e| match e {
                EndpointError::NotFound => {
                    PipelineError::NotFound(format!("endpoint {endpoint_id} not found"))
                }
                other => PipelineError::Persistence(format!("failed to load endpoint: {other}")),
            })
    }

    fn exploration_config(
        &self,
        job_id: Uuid,
        endpoint: &Endpoint,
        request: &ExplorationRequest,
        workspace: &ScratchWorkspace,
    ) -> ExplorationConfig {
        ExplorationConfig {
            target_url: endpoint.url.clone(),
            credentials: endpoint.credentials.clone(),
            procedure_name: request.procedure_name.clone(),
            job_id: job_id.to_string(),
            output_dir: workspace.path().to_string_lossy().to_string(),
            playwright_mcp_url: format!(
                "{}/sse",
                self.settings.playwright_mcp_url.trim_end_matches('/')
            ),
        }
    }

    /// Record a fatal outcome on the job and return the status it ends with.
    ///
    /// Tries the lifecycle transition first; a job that never reached
    /// Running falls back to a direct field update. A job that is already
    /// terminal keeps its status and result.
    pub async fn fail_job(&self, job_id: Uuid, status: JobStatus, reason: &str) -> JobStatus {
        let reason = truncate_reason(reason);
        match status {
            JobStatus::Stopped => info!(%job_id, error = %reason, "exploration job stopped"),
            _ => error!(%job_id, error = %reason, "exploration job failed"),
        }

        let mut result = JsonMap::new();
        result.insert(RESULT_ERROR.to_string(), json!(reason));

        let Err(e) = self.jobs.complete(job_id, status, result.clone()).await else {
            return status;
        };

        match self.jobs.get_by_id(job_id).await {
            Ok(job) if job.status.is_terminal() => {
                warn!(
                    %job_id,
                    recorded = %job.status,
                    "job already finished, leaving its outcome in place"
                );
                return job.status;
            }
            Ok(_) => {}
            Err(lookup) => {
                error!(%job_id, error = %lookup, "failed to load job while recording failure");
                return status;
            }
        }
        warn!(%job_id, error = %e, "failed to complete job, falling back to direct update");

        if let Err(e) = self
            .jobs
            .update(job_id, vec![JobSetter::Status(status), JobSetter::Result(result)])
            .await
        {
            error!(%job_id, error = %e, "failed to record job failure");
        }
        status
    }
}

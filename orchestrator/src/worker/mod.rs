//! Worker process adapter.
//!
//! The worker is an interpreter running a fixed exploration script:
//! - the [`ExplorationConfig`] arrives as one JSON document on stdin
//!   (never argv, so credentials stay out of process listings)
//! - provider authentication arrives through the environment
//! - before exiting 0 the worker writes [`WORKER_RESULT_FILE`] into the
//!   scratch workspace; any other exit status is a failure

mod process;

pub use process::{ProcessError, ProcessOutput, SubprocessRunner, TokioSubprocessRunner, WorkerCommand};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use shared_types::{ExplorationConfig, WorkerResult, WORKER_RESULT_FILE, WORKER_RESULT_SCHEMA_VERSION};
use tracing::{info, warn};

use crate::config::ProviderAuth;
use crate::error::PipelineError;
use crate::scope::{Interrupt, RunScope};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub interpreter: String,
    pub script_path: PathBuf,
    pub provider: ProviderAuth,
}

pub struct ExplorationWorker {
    settings: WorkerSettings,
    runner: Arc<dyn SubprocessRunner>,
}

impl ExplorationWorker {
    pub fn new(settings: WorkerSettings, runner: Arc<dyn SubprocessRunner>) -> Self {
        Self { settings, runner }
    }

    fn command(&self, workspace: &Path) -> WorkerCommand {
        WorkerCommand {
            program: self.settings.interpreter.clone(),
            args: vec![self.settings.script_path.to_string_lossy().to_string()],
            envs: self.settings.provider.env_vars(),
            current_dir: Some(workspace.to_path_buf()),
        }
    }

    /// Run the worker for one job and wait for it to exit successfully.
    pub async fn run(
        &self,
        scope: &RunScope,
        workspace: &Path,
        config: &ExplorationConfig,
    ) -> Result<(), PipelineError> {
        let stdin = serde_json::to_vec(config).map_err(|e| {
            PipelineError::ProcessFailure(format!("failed to marshal agent config: {e}"))
        })?;

        info!(
            job_id = %config.job_id,
            script_path = %self.settings.script_path.display(),
            target_url = %config.target_url,
            "spawning agent subprocess"
        );

        let output = self
            .runner
            .run(scope, self.command(workspace), stdin)
            .await
            .map_err(|e| match e {
                ProcessError::Cancelled => scope.interrupt_error(Interrupt::Cancelled),
                ProcessError::TimedOut => scope.interrupt_error(Interrupt::TimedOut),
                other => PipelineError::ProcessFailure(other.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(job_id = %config.job_id, status = %output.status, "agent subprocess exited unsuccessfully");
            return Err(PipelineError::ProcessFailure(format!(
                "{}; stderr: {}",
                output.status,
                stderr.trim_end()
            )));
        }

        Ok(())
    }

    /// Read and decode the result document the worker left behind.
    pub async fn read_result(
        &self,
        scope: &RunScope,
        workspace: &Path,
    ) -> Result<WorkerResult, PipelineError> {
        let path = workspace.join(WORKER_RESULT_FILE);
        let raw = scope
            .run(async {
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| PipelineError::DecodeFailure(format!("{}: {e}", path.display())))
            })
            .await?;
        decode_result(&raw)
    }
}

pub fn decode_result(raw: &[u8]) -> Result<WorkerResult, PipelineError> {
    let result: WorkerResult = serde_json::from_slice(raw)
        .map_err(|e| PipelineError::DecodeFailure(format!("failed to parse agent result: {e}")))?;
    if result.schema_version() > WORKER_RESULT_SCHEMA_VERSION {
        return Err(PipelineError::DecodeFailure(format!(
            "unsupported result schema version {} (supported: {})",
            result.schema_version(),
            WORKER_RESULT_SCHEMA_VERSION
        )));
    }
    Ok(result)
}

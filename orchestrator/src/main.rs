use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use shared_types::{exploration_job_config, Credential, Endpoint, Job, JobType};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use orchestrator::config::{Config, StorageKind};
use orchestrator::endpoints::{EndpointStore, InMemoryEndpointStore};
use orchestrator::jobs::{InMemoryJobStore, JobStore};
use orchestrator::procedures::InMemoryTestProcedureStore;
use orchestrator::registry::JobCancellations;
use orchestrator::storage::{BlobStorage, LocalStorage};
use orchestrator::worker::{ExplorationWorker, TokioSubprocessRunner, WorkerSettings};
use orchestrator::{Pipeline, PipelineSettings, WorkerPool};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One exploration, as read from `EXPLORER_REQUEST`.
#[derive(Debug, Deserialize)]
struct ExplorationRequestFile {
    endpoint: EndpointSpec,
    project_id: Uuid,
    #[serde(default)]
    procedure_name: Option<String>,
    created_by: Uuid,
}

#[derive(Debug, Deserialize)]
struct EndpointSpec {
    name: String,
    url: String,
    #[serde(default)]
    credentials: Vec<Credential>,
}

async fn read_request(path: &Path) -> anyhow::Result<ExplorationRequestFile> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read request {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid request {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "orchestrator=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(agent = ?config.agent, "orchestrator starting");

    let request_path = config
        .request_path
        .clone()
        .context("EXPLORER_REQUEST must point at an exploration request file")?;
    let request = read_request(&request_path).await?;

    // Storage
    let storage: Arc<dyn BlobStorage> = match config.storage.kind {
        StorageKind::Local => Arc::new(LocalStorage::new(&config.storage.local_base_dir).await?),
    };

    // Persistence collaborators
    let jobs = Arc::new(InMemoryJobStore::new());
    let endpoints = Arc::new(InMemoryEndpointStore::new());
    let procedures = Arc::new(InMemoryTestProcedureStore::new());

    let worker = ExplorationWorker::new(
        WorkerSettings {
            interpreter: config.agent.interpreter.clone(),
            script_path: config.agent.script_path.clone(),
            provider: config.agent.provider.clone(),
        },
        Arc::new(TokioSubprocessRunner::new(config.agent.stderr_limit_bytes)),
    );

    let pipeline = Arc::new(Pipeline::new(
        PipelineSettings {
            time_limit: config.agent.time_limit,
            scratch_dir: config.agent.scratch_dir.clone(),
            playwright_mcp_url: config.agent.playwright_mcp_url.clone(),
        },
        jobs.clone(),
        endpoints.clone(),
        procedures.clone(),
        storage,
        worker,
        JobCancellations::new(),
    ));

    let pool = WorkerPool::start(
        Arc::clone(&pipeline),
        config.agent.max_concurrent_workers,
        CancellationToken::new(),
    );

    let endpoint = endpoints
        .create(Endpoint::new(
            request.endpoint.name,
            request.endpoint.url,
            request.endpoint.credentials,
            request.created_by,
        ))
        .await?;
    let job = jobs
        .create(Job::new(
            JobType::UiExploration,
            request.created_by,
            exploration_job_config(
                endpoint.id,
                request.project_id,
                request.procedure_name.as_deref(),
            ),
        ))
        .await?;
    pool.submit(job.id).await?;

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let finished = pipeline
        .wait_for_terminal(job.id, interrupt, STATUS_POLL_INTERVAL)
        .await?;

    info!(
        job_id = %finished.id,
        status = %finished.status,
        duration_ms = ?finished.duration_ms,
        result = %serde_json::Value::Object(finished.result.clone()),
        "exploration job finished"
    );

    pool.shutdown().await;
    Ok(())
}

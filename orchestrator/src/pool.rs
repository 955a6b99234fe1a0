//! Fixed-size pool of tasks feeding job ids to the pipeline.
//!
//! The pipeline itself accepts any number of concurrent runs; this pool is
//! where the concurrency cap lives.

use std::sync::Arc;

use shared_types::JobStatus;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipeline::Pipeline;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
}

pub struct WorkerPool {
    queue: mpsc::Sender<Uuid>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `max(1, max_workers)` workers. Each takes one job at a time, so
    /// at most that many runs are active.
    pub fn start(pipeline: Arc<Pipeline>, max_workers: usize, shutdown: CancellationToken) -> Self {
        let size = max_workers.max(1);
        let (queue, rx) = mpsc::channel(size * 16);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&pipeline),
                    Arc::clone(&rx),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers = size, "worker pool started");
        Self {
            queue,
            shutdown,
            workers,
        }
    }

    /// Queue `job_id`, waiting for room if the queue is full.
    pub async fn submit(&self, job_id: Uuid) -> Result<(), PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::Closed);
        }
        self.queue.send(job_id).await.map_err(|_| PoolError::Closed)?;
        debug!(%job_id, "job queued");
        Ok(())
    }

    /// Stop taking new jobs and wait for the workers to finish the runs they
    /// already hold.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "pool worker ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    pipeline: Arc<Pipeline>,
    rx: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    shutdown: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job_id = rx.recv() => job_id,
            }
        };
        let Some(job_id) = next else {
            break;
        };

        debug!(worker_id, %job_id, "worker picked up job");
        let status = match pipeline.spawn(job_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(worker_id, %job_id, error = %e, "run task failed to join");
                JobStatus::Failed
            }
        };
        debug!(worker_id, %job_id, %status, "worker finished job");
    }
    debug!(worker_id, "pool worker exiting");
}

//! Uploads the evidence files a worker references and rewrites the steps to
//! point at their stored copies.

use std::path::Path;
use std::sync::Arc;

use shared_types::{TestStep, WorkerStep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::scope::RunScope;
use crate::storage::BlobStorage;
use crate::workspace::ScratchWorkspace;

/// Name of the step synthesized when the worker reports no interactions.
pub const PLACEHOLDER_STEP_NAME: &str = "Initial observation";

pub struct ArtifactCollector {
    storage: Arc<dyn BlobStorage>,
}

impl ArtifactCollector {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }

    /// Upload every image the steps reference and return the final steps.
    ///
    /// A reference that cannot be resolved, opened or uploaded is dropped
    /// with a warning; the step itself is kept. Only an interruption of
    /// `scope` fails the collection.
    pub async fn collect(
        &self,
        scope: &RunScope,
        workspace: &ScratchWorkspace,
        project_id: Uuid,
        steps: Vec<WorkerStep>,
        summary: &str,
    ) -> Result<Vec<TestStep>, PipelineError> {
        let mut collected = Vec::with_capacity(steps.len());

        for step in steps {
            let mut image_paths = Vec::with_capacity(step.image_paths.len());
            for reference in &step.image_paths {
                if scope.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let stored = scope
                    .bound(self.store_one(workspace, project_id, reference))
                    .await
                    .map_err(|interrupt| scope.interrupt_error(interrupt))?;
                if let Some(locator) = stored {
                    image_paths.push(locator);
                }
            }
            collected.push(TestStep {
                name: step.name,
                instructions: step.instructions,
                image_paths,
            });
        }

        if collected.is_empty() {
            info!("worker reported no steps, recording initial observation");
            collected.push(TestStep {
                name: PLACEHOLDER_STEP_NAME.to_string(),
                instructions: summary.to_string(),
                image_paths: Vec::new(),
            });
        }

        Ok(collected)
    }

    async fn store_one(
        &self,
        workspace: &ScratchWorkspace,
        project_id: Uuid,
        reference: &str,
    ) -> Option<String> {
        let Some(path) = workspace.resolve(reference) else {
            warn!(path = %reference, "image path outside scratch workspace, skipping");
            return None;
        };

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open image");
                return None;
            }
        };

        let key = storage_key(project_id, &path);
        if let Err(e) = self.storage.upload(&key, &mut file).await {
            warn!(path = %path.display(), %key, error = %e, "failed to upload image");
            return None;
        }

        match self.storage.get_url(&key).await {
            Ok(url) => {
                debug!(%key, %url, "image uploaded");
                Some(url)
            }
            Err(e) => {
                debug!(%key, error = %e, "no URL for uploaded image, keeping storage key");
                Some(key)
            }
        }
    }
}

/// `test-procedures/{project_id}/{ulid}_{file_name}`
pub fn storage_key(project_id: Uuid, path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    format!(
        "test-procedures/{project_id}/{}_{file_name}",
        ulid::Ulid::new()
    )
}

//! Turns a finished exploration into a stored test procedure.

use std::sync::Arc;

use serde_json::json;
use shared_types::{
    JsonMap, TestProcedure, TestStep, WorkerResult, RESULT_PROCEDURE_ID, RESULT_PROCEDURE_NAME,
    RESULT_STEPS_COUNT,
};
use tracing::info;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::procedures::TestProcedureStore;

const DESCRIPTION_PREFIX: &str = "Auto-generated from UI exploration: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedProcedure {
    pub id: Uuid,
    pub name: String,
    pub steps_count: usize,
}

impl PersistedProcedure {
    /// Result map recorded on the job when the run succeeds.
    pub fn summary(&self) -> JsonMap {
        let mut result = JsonMap::new();
        result.insert(RESULT_PROCEDURE_ID.to_string(), json!(self.id.to_string()));
        result.insert(RESULT_PROCEDURE_NAME.to_string(), json!(self.name));
        result.insert(RESULT_STEPS_COUNT.to_string(), json!(self.steps_count));
        result
    }
}

pub struct ResultPersister {
    procedures: Arc<dyn TestProcedureStore>,
}

impl ResultPersister {
    pub fn new(procedures: Arc<dyn TestProcedureStore>) -> Self {
        Self { procedures }
    }

    pub async fn persist(
        &self,
        project_id: Uuid,
        created_by: Uuid,
        configured_name: &str,
        result: &WorkerResult,
        steps: Vec<TestStep>,
    ) -> Result<PersistedProcedure, PipelineError> {
        let name = if result.procedure_name.trim().is_empty() {
            configured_name
        } else {
            result.procedure_name.as_str()
        };
        let procedure = TestProcedure::new(
            project_id,
            name,
            format!("{DESCRIPTION_PREFIX}{}", result.description),
            steps,
            created_by,
        );

        let created = self
            .procedures
            .create(procedure)
            .await
            .map_err(|e| PipelineError::Persistence(format!("failed to create test procedure: {e}")))?;

        info!(
            procedure_id = %created.id,
            project_id = %project_id,
            steps = created.steps.len(),
            "test procedure persisted"
        );

        Ok(PersistedProcedure {
            id: created.id,
            name: created.name,
            steps_count: created.steps.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedures::InMemoryTestProcedureStore;

    fn steps() -> Vec<TestStep> {
        vec![TestStep {
            name: "Open".to_string(),
            instructions: "Open the login page".to_string(),
            image_paths: vec!["/blobs/a.png".to_string()],
        }]
    }

    #[tokio::test]
    async fn persists_with_worker_name_and_prefixed_description() {
        let store = Arc::new(InMemoryTestProcedureStore::new());
        let persister = ResultPersister::new(store.clone());
        let result = WorkerResult {
            procedure_name: "Checkout".to_string(),
            description: "covers the cart".to_string(),
            ..Default::default()
        };
        let project_id = Uuid::new_v4();
        let created_by = Uuid::new_v4();

        let persisted = persister
            .persist(project_id, created_by, "UI Exploration", &result, steps())
            .await
            .unwrap();

        assert_eq!(persisted.name, "Checkout");
        assert_eq!(persisted.steps_count, 1);
        let stored = store.get_by_id(persisted.id).await.unwrap();
        assert_eq!(stored.description, "Auto-generated from UI exploration: covers the cart");
        assert_eq!(stored.project_id, project_id);
        assert_eq!(stored.created_by, created_by);
        assert!(stored.is_latest);

        let summary = persisted.summary();
        assert_eq!(summary[RESULT_PROCEDURE_ID], json!(persisted.id.to_string()));
        assert_eq!(summary[RESULT_STEPS_COUNT], json!(1));
    }

    #[tokio::test]
    async fn blank_worker_name_uses_configured_name() {
        let persister = ResultPersister::new(Arc::new(InMemoryTestProcedureStore::new()));
        let persisted = persister
            .persist(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Smoke test",
                &WorkerResult::default(),
                steps(),
            )
            .await
            .unwrap();
        assert_eq!(persisted.name, "Smoke test");
    }

    #[tokio::test]
    async fn store_rejection_is_a_persistence_error() {
        let persister = ResultPersister::new(Arc::new(InMemoryTestProcedureStore::new()));
        let mut bad = steps();
        bad[0].name = String::new();
        let err = persister
            .persist(Uuid::new_v4(), Uuid::new_v4(), "Smoke", &WorkerResult::default(), bad)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));
    }
}

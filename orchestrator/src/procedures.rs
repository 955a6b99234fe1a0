//! Test-procedure persistence collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use shared_types::TestProcedure;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProcedureError {
    #[error("test procedure not found")]
    NotFound,
    #[error("invalid test procedure: {0}")]
    Invalid(String),
    #[error("test procedure store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TestProcedureStore: Send + Sync {
    async fn create(&self, procedure: TestProcedure) -> Result<TestProcedure, ProcedureError>;

    async fn get_by_id(&self, id: Uuid) -> Result<TestProcedure, ProcedureError>;

    /// Latest versions only, newest first.
    async fn list_by_project(
        &self,
        project_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TestProcedure>, ProcedureError>;
}

#[derive(Default)]
pub struct InMemoryTestProcedureStore {
    procedures: RwLock<HashMap<Uuid, TestProcedure>>,
}

impl InMemoryTestProcedureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestProcedureStore for InMemoryTestProcedureStore {
    async fn create(&self, mut procedure: TestProcedure) -> Result<TestProcedure, ProcedureError> {
        procedure
            .validate()
            .map_err(|e| ProcedureError::Invalid(e.to_string()))?;
        procedure.version = 0;
        procedure.is_latest = true;
        procedure.parent_id = None;

        self.procedures
            .write()
            .await
            .insert(procedure.id, procedure.clone());
        info!(
            procedure_id = %procedure.id,
            project_id = %procedure.project_id,
            steps = procedure.steps.len(),
            "test procedure created"
        );
        Ok(procedure)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<TestProcedure, ProcedureError> {
        self.procedures
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ProcedureError::NotFound)
    }

    async fn list_by_project(
        &self,
        project_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TestProcedure>, ProcedureError> {
        let procedures = self.procedures.read().await;
        let mut matching: Vec<TestProcedure> = procedures
            .values()
            .filter(|p| p.project_id == project_id && p.is_latest)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::TestStep;

    fn procedure(project_id: Uuid, step_name: &str) -> TestProcedure {
        TestProcedure::new(
            project_id,
            "Login flow",
            "Auto-generated",
            vec![TestStep {
                name: step_name.to_string(),
                instructions: "Open the login page".to_string(),
                image_paths: vec![],
            }],
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn create_marks_latest_and_lists_by_project() {
        let store = InMemoryTestProcedureStore::new();
        let project_id = Uuid::new_v4();
        let created = store.create(procedure(project_id, "Open")).await.unwrap();
        store
            .create(procedure(Uuid::new_v4(), "Other"))
            .await
            .unwrap();

        assert!(created.is_latest);
        assert_eq!(created.version, 0);
        assert_eq!(store.get_by_id(created.id).await.unwrap(), created);

        let listed = store.list_by_project(project_id, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
    }

    #[tokio::test]
    async fn create_rejects_unnamed_steps() {
        let store = InMemoryTestProcedureStore::new();
        let err = store
            .create(procedure(Uuid::new_v4(), ""))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProcedureError::Invalid("step 1: step name is required".to_string())
        );
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use shared_types::{Job, JobStatus, JobType, JsonMap};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{JobError, JobSetter, JobStore};

/// Process-local job store. Every operation takes the table lock, so
/// `start`/`complete` are atomic read-modify-writes.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page(mut jobs: Vec<Job>, limit: usize, offset: usize) -> Vec<Job> {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<Job, JobError> {
        job.validate()?;
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(JobError::Invalid(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        info!(job_id = %job.id, job_type = %job.job_type, "job created");
        Ok(job)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Job, JobError> {
        self.jobs
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobError::NotFound)
    }

    async fn update(&self, id: Uuid, setters: Vec<JobSetter>) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().await;
        let stored = jobs.get_mut(&id).ok_or(JobError::NotFound)?;

        let mut updated = stored.clone();
        for setter in setters {
            setter.apply(&mut updated)?;
        }
        updated.updated_at = Utc::now();
        *stored = updated;

        info!(job_id = %id, "job updated");
        Ok(())
    }

    async fn list_by_creator(
        &self,
        created_by: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, JobError> {
        let jobs = self.jobs.lock().await;
        let matching = jobs
            .values()
            .filter(|j| j.created_by == created_by)
            .cloned()
            .collect();
        Ok(page(matching, limit, offset))
    }

    async fn count_by_creator(&self, created_by: Uuid) -> Result<usize, JobError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.values().filter(|j| j.created_by == created_by).count())
    }

    async fn list_by_type(
        &self,
        job_type: JobType,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, JobError> {
        let jobs = self.jobs.lock().await;
        let matching = jobs
            .values()
            .filter(|j| j.job_type == job_type)
            .cloned()
            .collect();
        Ok(page(matching, limit, offset))
    }

    async fn start(&self, id: Uuid) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound)?;
        job.start(Utc::now())?;
        info!(job_id = %id, "job started");
        Ok(())
    }

    async fn complete(
        &self,
        id: Uuid,
        status: JobStatus,
        result: JsonMap,
    ) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound)?;
        job.complete(status, result, Utc::now())?;
        info!(job_id = %id, %status, "job completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(created_by: Uuid) -> Job {
        Job::new(JobType::UiExploration, created_by, JsonMap::new())
    }

    #[tokio::test]
    async fn start_and_complete_are_not_idempotent() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(Uuid::new_v4())).await.unwrap();

        store.start(job.id).await.unwrap();
        assert_eq!(store.start(job.id).await, Err(JobError::AlreadyStarted));

        store
            .complete(job.id, JobStatus::Success, JsonMap::new())
            .await
            .unwrap();
        assert_eq!(
            store
                .complete(job.id, JobStatus::Failed, JsonMap::new())
                .await,
            Err(JobError::NotRunning)
        );

        let stored = store.get_by_id(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert!(stored.end_time.is_some());
        assert!(stored.duration_ms.is_some());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.get_by_id(id).await, Err(JobError::NotFound));
        assert_eq!(store.start(id).await, Err(JobError::NotFound));
        assert_eq!(
            store.complete(id, JobStatus::Failed, JsonMap::new()).await,
            Err(JobError::NotFound)
        );
        assert_eq!(
            store.update(id, vec![JobSetter::Status(JobStatus::Failed)]).await,
            Err(JobError::NotFound)
        );
    }

    #[tokio::test]
    async fn create_rejects_missing_creator() {
        let store = InMemoryJobStore::new();
        let err = store.create(new_job(Uuid::nil())).await.unwrap_err();
        assert!(matches!(err, JobError::Invalid(_)));
    }

    #[tokio::test]
    async fn update_applies_setters_without_lifecycle_checks() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(Uuid::new_v4())).await.unwrap();

        let mut result = JsonMap::new();
        result.insert("error".to_string(), serde_json::json!("bad config"));
        store
            .update(
                job.id,
                vec![JobSetter::Status(JobStatus::Failed), JobSetter::Result(result)],
            )
            .await
            .unwrap();

        let stored = store.get_by_id(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.result["error"], "bad config");
        assert!(stored.end_time.is_none());
    }

    #[tokio::test]
    async fn listing_filters_and_pages_newest_first() {
        let store = InMemoryJobStore::new();
        let creator = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = store.create(new_job(creator)).await.unwrap();
            ids.push(job.id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store.create(new_job(Uuid::new_v4())).await.unwrap();

        assert_eq!(store.count_by_creator(creator).await.unwrap(), 3);

        let first_page = store.list_by_creator(creator, 2, 0).await.unwrap();
        assert_eq!(
            first_page.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1]]
        );
        let second_page = store.list_by_creator(creator, 2, 2).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].id, ids[0]);

        let by_type = store
            .list_by_type(JobType::UiExploration, 10, 0)
            .await
            .unwrap();
        assert_eq!(by_type.len(), 4);
    }
}

//! Job id -> cancellation trigger table shared by every in-flight run.
//!
//! The pipeline registers a token at the start of a run and holds a
//! [`RegistrationGuard`] until the run exits; dropping the guard removes the
//! entry, so removal also happens when the run unwinds from a panic.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub trait CancelRegistry: Send + Sync {
    fn register(&self, job_id: Uuid, token: CancellationToken);

    fn lookup(&self, job_id: Uuid) -> Option<CancellationToken>;

    fn remove(&self, job_id: Uuid);

    /// Fire the trigger registered for `job_id`, if any.
    ///
    /// Best effort: returns once the signal is sent, not once the run has
    /// observed it.
    fn request_stop(&self, job_id: Uuid) -> bool {
        match self.lookup(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Register `token` and return a guard that removes it again on drop.
pub fn register_scoped(
    registry: &Arc<dyn CancelRegistry>,
    job_id: Uuid,
    token: CancellationToken,
) -> RegistrationGuard {
    registry.register(job_id, token);
    RegistrationGuard {
        registry: Arc::clone(registry),
        job_id,
    }
}

pub struct RegistrationGuard {
    registry: Arc<dyn CancelRegistry>,
    job_id: Uuid,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(self.job_id);
    }
}

/// DashMap-backed registry; entries for different jobs live in different
/// shards, so runs do not contend on a single lock.
#[derive(Default)]
pub struct JobCancellations {
    triggers: DashMap<Uuid, CancellationToken>,
}

impl JobCancellations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

impl CancelRegistry for JobCancellations {
    fn register(&self, job_id: Uuid, token: CancellationToken) {
        self.triggers.insert(job_id, token);
    }

    fn lookup(&self, job_id: Uuid) -> Option<CancellationToken> {
        self.triggers.get(&job_id).map(|entry| entry.clone())
    }

    fn remove(&self, job_id: Uuid) {
        self.triggers.remove(&job_id);
    }
}

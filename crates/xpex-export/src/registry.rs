//! In-memory export job registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use xpex_models::{ExportId, ExportJob, ExportState};

/// Process-wide map of export id → job record.
///
/// Deliberately not persisted: a restart loses all jobs, including the
/// download URLs of completed ones. Mutations go through [`Self::update`],
/// which refuses to touch terminal jobs.
#[derive(Clone, Default)]
pub struct ExportRegistry {
    jobs: Arc<RwLock<HashMap<ExportId, ExportJob>>>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job.
    pub async fn insert(&self, job: ExportJob) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    /// Snapshot of one job.
    pub async fn get(&self, id: &ExportId) -> Option<ExportJob> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Snapshot of all jobs, newest first.
    pub async fn list(&self) -> Vec<ExportJob> {
        let mut jobs: Vec<ExportJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Apply a transition to a job. Terminal jobs are left untouched.
    ///
    /// Returns the record after the call, or `None` for an unknown id.
    pub async fn update<F>(&self, id: &ExportId, transition: F) -> Option<ExportJob>
    where
        F: FnOnce(ExportJob) -> ExportJob,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id)?;
        if !job.is_terminal() {
            *job = transition(job.clone());
        }
        Some(job.clone())
    }

    /// Output path of a job, available once it has succeeded.
    pub async fn output_path(&self, id: &ExportId) -> Option<PathBuf> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(id)?;
        if job.state == ExportState::Succeeded {
            job.output_path.clone()
        } else {
            None
        }
    }
}

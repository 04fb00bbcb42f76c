use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::Serialize;
use tenderflow_core::{CoreError, JobStatus, ScrapeJob, TenderRecord};
use tokio::sync::Mutex;
use tracing::debug;

/// Partial job update; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub records_processed: Option<usize>,
    pub error: Option<String>,
    pub data: Option<Vec<TenderRecord>>,
}

impl JobUpdate {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(data: Vec<TenderRecord>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            records_processed: Some(data.len()),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
    pub records_processed: usize,
}

/// Concurrency-safe job registry enforcing the forward-only job state machine.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<String, ScrapeJob>>,
    seq: AtomicU64,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_job(&self, platform_id: &str) -> String {
        let now = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("job_{platform_id}_{}_{seq}", now.timestamp_millis());
        let job = ScrapeJob {
            id: id.clone(),
            platform_id: platform_id.to_string(),
            status: JobStatus::Running,
            start_time: now,
            terminal_time: None,
            progress: 0,
            records_processed: 0,
            errors: Vec::new(),
            data: Vec::new(),
        };
        self.jobs.lock().await.insert(id.clone(), job);
        debug!(job_id = %id, platform_id, "job created");
        id
    }

    /// Returns false when the job is unknown, already terminal, or the status would move backwards.
    pub async fn update_job(&self, job_id: &str, update: JobUpdate) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        if job.status.is_terminal() {
            debug!(job_id, status = ?job.status, "update rejected for terminal job");
            return false;
        }
        if let Some(next) = update.status {
            if !job.status.can_transition_to(next) {
                return false;
            }
        }

        if let Some(progress) = update.progress {
            job.progress = progress.min(100);
        }
        if let Some(records) = update.records_processed {
            job.records_processed = records;
        }
        if let Some(error) = update.error {
            job.errors.push(error);
        }
        if let Some(data) = update.data {
            job.data = data;
        }
        if let Some(next) = update.status {
            job.status = next;
            if next.is_terminal() {
                job.terminal_time = Some(Utc::now());
            }
        }
        true
    }

    pub async fn get_job(&self, job_id: &str) -> Result<ScrapeJob, CoreError> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self) -> Vec<ScrapeJob> {
        let mut jobs: Vec<_> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .is_some_and(|j| j.status == JobStatus::Running)
    }

    pub async fn stop_job(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Stopped;
                job.terminal_time = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub async fn stop_all(&self) -> usize {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let mut stopped = 0;
        for job in jobs.values_mut().filter(|j| j.status == JobStatus::Running) {
            job.status = JobStatus::Stopped;
            job.terminal_time = Some(now);
            stopped += 1;
        }
        stopped
    }

    pub async fn active_count(&self) -> usize {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    pub async fn stats(&self) -> JobStats {
        let jobs = self.jobs.lock().await;
        let mut stats = JobStats {
            total: jobs.len(),
            ..JobStats::default()
        };
        for job in jobs.values() {
            *stats.by_status.entry(job.status).or_default() += 1;
            stats.records_processed += job.records_processed;
        }
        stats
    }
}

//! Persistent job log with artifact blobs.
//!
//! Jobs live newest-first in a single JSON document rewritten on every
//! change; compiled motion programs ("artifacts") live one file per job
//! id under `gcode/`. This is deliberately simple — the workload is
//! human-paced (hundreds of jobs), and one rewritten document beats a
//! database for operator inspection and backup.
//!
//! Lifecycle: `pending → active → finished | failed | stopped`. A job
//! found `active` at startup was interrupted mid-engrave and is demoted
//! to `stopped`; engraving is single-instance and non-resumable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Finished,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Stopped)
    }
}

/// Free-form per-job settings (placement overrides, recorded geometry).
/// Kept schemaless so the enqueue surface can evolve without migrations.
pub type JobSettings = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub source: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default)]
    pub settings: JobSettings,
    /// File name of the stored artifact, when one exists.
    pub artifact_ref: Option<String>,
}

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("unknown job id {0}")]
    UnknownJob(String),
    #[error("job store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("job store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Fields applied by [`JobStore::update`]; `None` leaves a field alone.
#[derive(Debug, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub error: Option<Option<String>>,
    pub settings: Option<JobSettings>,
    pub artifact_ref: Option<Option<String>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn status_with_error(status: JobStatus, error: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            error: Some(Some(error.into())),
            ..Self::default()
        }
    }
}

pub struct JobStore {
    jobs_file: PathBuf,
    gcode_dir: PathBuf,
    jobs: Vec<Job>,
}

impl JobStore {
    /// Open the store under `data_dir`, demoting any job left `active` by
    /// a previous process.
    pub fn open(data_dir: &Path) -> Result<Self, JobStoreError> {
        let jobs_file = data_dir.join("jobs.json");
        let gcode_dir = data_dir.join("gcode");
        std::fs::create_dir_all(&gcode_dir)?;

        let mut jobs: Vec<Job> = match std::fs::read_to_string(&jobs_file) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(jobs) => jobs,
                Err(err) => {
                    warn!(target: "jobs", error = %err, "jobs_parse_failed_starting_empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        let mut demoted = 0;
        for job in &mut jobs {
            if job.status == JobStatus::Active {
                job.status = JobStatus::Stopped;
                job.error = Some("Interrupted by server restart".to_string());
                job.completed_at = Some(Utc::now());
                demoted += 1;
            }
        }
        if demoted > 0 {
            info!(target: "jobs", demoted, "active_jobs_demoted_on_startup");
        }

        let store = Self {
            jobs_file,
            gcode_dir,
            jobs,
        };
        store.save()?;
        Ok(store)
    }

    /// Create a pending job at the head of the log (newest first).
    pub fn add(
        &mut self,
        name: &str,
        source: &str,
        settings: Option<JobSettings>,
    ) -> Result<Job, JobStoreError> {
        let job = Job {
            id: new_job_id(),
            name: name.to_string(),
            source: source.to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            settings: settings.unwrap_or_default(),
            artifact_ref: None,
        };
        debug!(target: "jobs", id = %job.id, name = %job.name, source = %job.source, "job_added");
        self.jobs.insert(0, job.clone());
        self.save()?;
        Ok(job)
    }

    /// Apply an update; terminal statuses stamp `completed_at`.
    pub fn update(&mut self, id: &str, update: JobUpdate) -> Result<Job, JobStoreError> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| JobStoreError::UnknownJob(id.to_string()))?;

        if let Some(status) = update.status {
            job.status = status;
            if status.is_terminal() {
                job.completed_at = Some(Utc::now());
            }
        }
        if let Some(error) = update.error {
            job.error = error;
        }
        if let Some(settings) = update.settings {
            job.settings = settings;
        }
        if let Some(artifact_ref) = update.artifact_ref {
            job.artifact_ref = artifact_ref;
        }
        let job = job.clone();
        self.save()?;
        Ok(job)
    }

    /// Oldest pending job (FIFO over the newest-first log).
    pub fn next_pending(&self) -> Option<Job> {
        self.jobs
            .iter()
            .rev()
            .find(|j| j.status == JobStatus::Pending)
            .cloned()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Store the compiled program for a job and link it on the record.
    pub fn save_artifact(&mut self, id: &str, blob: &str) -> Result<(), JobStoreError> {
        if self.job(id).is_none() {
            return Err(JobStoreError::UnknownJob(id.to_string()));
        }
        let file_name = format!("{id}.gcode");
        std::fs::write(self.gcode_dir.join(&file_name), blob)?;
        self.update(
            id,
            JobUpdate {
                artifact_ref: Some(Some(file_name)),
                ..JobUpdate::default()
            },
        )?;
        Ok(())
    }

    pub fn artifact(&self, id: &str) -> Option<String> {
        let job = self.job(id)?;
        let file_name = job.artifact_ref.as_ref()?;
        std::fs::read_to_string(self.gcode_dir.join(file_name)).ok()
    }

    pub fn artifact_path(&self, id: &str) -> Option<PathBuf> {
        let job = self.job(id)?;
        let path = self.gcode_dir.join(job.artifact_ref.as_ref()?);
        path.exists().then_some(path)
    }

    /// Clone a job into a fresh pending one, carrying settings and — when
    /// present — a copy of the artifact so the orchestrator can skip
    /// compilation entirely.
    pub fn redo(&mut self, id: &str) -> Result<Job, JobStoreError> {
        let original = self
            .job(id)
            .cloned()
            .ok_or_else(|| JobStoreError::UnknownJob(id.to_string()))?;

        let source = format!("{} (redo)", original.source);
        let new_job = self.add(&original.name, &source, Some(original.settings.clone()))?;
        if original.artifact_ref.is_some()
            && let Some(blob) = self.artifact(id)
        {
            self.save_artifact(&new_job.id, &blob)?;
        }
        // Return the fully-linked record.
        Ok(self
            .job(&new_job.id)
            .cloned()
            .unwrap_or(new_job))
    }

    fn save(&self) -> Result<(), JobStoreError> {
        let text = serde_json::to_string_pretty(&self.jobs)?;
        std::fs::write(&self.jobs_file, text).map_err(|e| {
            warn!(target: "jobs", error = %e, "jobs_save_failed");
            JobStoreError::Io(e)
        })
    }
}

/// 8-character unique token, the head of a v4 UUID.
fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_prepends_and_next_pending_is_fifo() {
        let dir = TempDir::new().unwrap();
        let mut store = JobStore::open(dir.path()).unwrap();
        let first = store.add("alice", "twitch", None).unwrap();
        let second = store.add("bob", "manual", None).unwrap();

        // Newest first in the log…
        assert_eq!(store.jobs()[0].id, second.id);
        // …oldest first out of the queue.
        assert_eq!(store.next_pending().unwrap().id, first.id);
    }

    #[test]
    fn ids_are_eight_chars_and_unique() {
        let dir = TempDir::new().unwrap();
        let mut store = JobStore::open(dir.path()).unwrap();
        let a = store.add("a", "test", None).unwrap();
        let b = store.add("b", "test", None).unwrap();
        assert_eq!(a.id.len(), 8);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn terminal_update_stamps_completed_at() {
        let dir = TempDir::new().unwrap();
        let mut store = JobStore::open(dir.path()).unwrap();
        let job = store.add("alice", "twitch", None).unwrap();
        assert!(job.completed_at.is_none());

        let active = store
            .update(&job.id, JobUpdate::status(JobStatus::Active))
            .unwrap();
        assert!(active.completed_at.is_none());

        let done = store
            .update(&job.id, JobUpdate::status(JobStatus::Finished))
            .unwrap();
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn restart_restores_jobs_and_demotes_active() {
        let dir = TempDir::new().unwrap();
        let (done_id, active_id) = {
            let mut store = JobStore::open(dir.path()).unwrap();
            let done = store.add("done", "twitch", None).unwrap();
            store
                .update(&done.id, JobUpdate::status(JobStatus::Finished))
                .unwrap();
            let active = store.add("running", "twitch", None).unwrap();
            store
                .update(&active.id, JobUpdate::status(JobStatus::Active))
                .unwrap();
            (done.id, active.id)
        };

        let store = JobStore::open(dir.path()).unwrap();
        assert_eq!(store.job(&done_id).unwrap().status, JobStatus::Finished);
        let demoted = store.job(&active_id).unwrap();
        assert_eq!(demoted.status, JobStatus::Stopped);
        assert_eq!(
            demoted.error.as_deref(),
            Some("Interrupted by server restart")
        );
    }

    #[test]
    fn artifact_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = JobStore::open(dir.path()).unwrap();
        let job = store.add("alice", "twitch", None).unwrap();
        store.save_artifact(&job.id, "G21\nM2").unwrap();
        assert_eq!(store.artifact(&job.id).unwrap(), "G21\nM2");
        assert!(store.artifact_path(&job.id).unwrap().exists());
        assert_eq!(
            store.job(&job.id).unwrap().artifact_ref.as_deref(),
            Some(format!("{}.gcode", job.id).as_str())
        );
    }

    #[test]
    fn redo_clones_settings_and_copies_artifact() {
        let dir = TempDir::new().unwrap();
        let mut store = JobStore::open(dir.path()).unwrap();
        let mut settings = JobSettings::new();
        settings.insert("text_height_mm".into(), serde_json::json!(8.0));
        let job = store.add("alice", "twitch", Some(settings.clone())).unwrap();
        store.save_artifact(&job.id, "G21\nG0 X1 Y1\nM2").unwrap();
        store
            .update(&job.id, JobUpdate::status(JobStatus::Finished))
            .unwrap();

        let clone = store.redo(&job.id).unwrap();
        assert_ne!(clone.id, job.id);
        assert_eq!(clone.status, JobStatus::Pending);
        assert_eq!(clone.settings, settings);
        // Byte-identical artifact under the new id.
        assert_eq!(store.artifact(&clone.id).unwrap(), "G21\nG0 X1 Y1\nM2");
    }

    #[test]
    fn redo_without_artifact_still_clones() {
        let dir = TempDir::new().unwrap();
        let mut store = JobStore::open(dir.path()).unwrap();
        let job = store.add("alice", "twitch", None).unwrap();
        let clone = store.redo(&job.id).unwrap();
        assert!(clone.artifact_ref.is_none());
        assert_eq!(clone.name, "alice");
    }

    #[test]
    fn unknown_ids_error() {
        let dir = TempDir::new().unwrap();
        let mut store = JobStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.update("nope", JobUpdate::status(JobStatus::Failed)),
            Err(JobStoreError::UnknownJob(_))
        ));
        assert!(matches!(
            store.redo("nope"),
            Err(JobStoreError::UnknownJob(_))
        ));
    }
}

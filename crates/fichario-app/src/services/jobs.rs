//! In-memory batch job store.
//!
//! Jobs live for the lifetime of the process; restarting the server forgets
//! them. A job is created in `iniciando`, moves to `processando` when the
//! pipeline picks it up and ends in `concluido` or `erro`. Per-file state and
//! counters are only ever mutated through the store so the counter invariant
//! (`processados + pendentes == totalArquivos`, `erros <= processados`) holds
//! at every await point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use fichario_server::{JobResultView, JobStatusView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    #[serde(rename = "iniciando")]
    Starting,
    #[serde(rename = "processando")]
    Processing,
    #[serde(rename = "concluido")]
    Done,
    #[serde(rename = "erro")]
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "iniciando",
            Self::Processing => "processando",
            Self::Done => "concluido",
            Self::Failed => "erro",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    #[serde(rename = "pendente")]
    Pending,
    #[serde(rename = "processando")]
    Processing,
    #[serde(rename = "concluido")]
    Done,
    #[serde(rename = "erro")]
    Failed,
}

/// One file of a batch as tracked inside the job.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    #[serde(rename = "filename")]
    pub stored_name: String,
    #[serde(rename = "originalname")]
    pub original_name: String,
    #[serde(rename = "path")]
    pub storage_path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    #[serde(rename = "sucesso")]
    Success,
    #[serde(rename = "erro")]
    Error,
}

/// Per-file outcome appended in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    #[serde(rename = "arquivo")]
    pub file_ref: String,
    #[serde(rename = "originalname")]
    pub original_name: String,
    #[serde(rename = "status")]
    pub outcome: Outcome,
    #[serde(rename = "dadosAnalisados", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(rename = "erro", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "dataProcessamento")]
    pub completed_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn success(file: &FileRecord, payload: Value) -> Self {
        Self {
            file_ref: file.stored_name.clone(),
            original_name: file.original_name.clone(),
            outcome: Outcome::Success,
            payload: Some(payload),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(file: &FileRecord, message: impl Into<String>) -> Self {
        Self {
            file_ref: file.stored_name.clone(),
            original_name: file.original_name.clone(),
            outcome: Outcome::Error,
            payload: None,
            error: Some(message.into()),
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: String,
    pub status: JobStatus,
    pub total_files: usize,
    pub processed_count: usize,
    pub pending_count: usize,
    pub error_count: usize,
    pub files: Vec<FileRecord>,
    pub results: Vec<ResultRecord>,
    pub consolidated: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    fn new(id: String, files: Vec<FileRecord>) -> Self {
        let total_files = files.len();
        Self {
            id,
            status: JobStatus::Starting,
            total_files,
            processed_count: 0,
            pending_count: total_files,
            error_count: 0,
            files,
            results: Vec::with_capacity(total_files),
            consolidated: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Rounded to the nearest integer, matching the wire contract. Zero-file
    /// jobs report zero rather than dividing by zero.
    pub fn progress_percent(&self) -> u32 {
        if self.total_files == 0 {
            return 0;
        }
        ((self.processed_count as f64 / self.total_files as f64) * 100.0).round() as u32
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status.as_str().to_string(),
            total_files: self.total_files,
            processed: self.processed_count,
            pending: self.pending_count,
            errors: self.error_count,
            started_at: self.started_at,
            finished_at: self.finished_at,
            progress_percent: self.progress_percent(),
        }
    }

    pub fn result_view(&self) -> JobResultView {
        JobResultView {
            status: self.status_view(),
            files: self
                .files
                .iter()
                .map(|file| serde_json::to_value(file).unwrap_or(Value::Null))
                .collect(),
            results: self
                .results
                .iter()
                .map(|result| serde_json::to_value(result).unwrap_or(Value::Null))
                .collect(),
            consolidated: self.consolidated.clone(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(self.processed_count + self.pending_count, self.total_files);
        debug_assert!(self.error_count <= self.processed_count);
        debug_assert_eq!(self.results.len(), self.processed_count);
        debug_assert_eq!(self.files.len(), self.total_files);
        debug_assert_eq!(self.finished_at.is_some(), self.status.is_terminal());
    }
}

#[derive(Debug, Error)]
#[error("job `{0}` not found")]
pub struct JobNotFound(pub String);

/// Shared handle to all jobs of the process. Cloning is cheap; every clone
/// sees the same map.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, BatchJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job in `iniciando` and returns its id.
    pub async fn create(&self, files: Vec<FileRecord>) -> String {
        let id = Uuid::new_v4().to_string();
        let job = BatchJob::new(id.clone(), files);
        job.assert_invariants();
        self.jobs.write().await.insert(id.clone(), job);
        id
    }

    pub async fn get(&self, id: &str) -> Option<BatchJob> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn set_status(&self, id: &str, status: JobStatus) -> Result<(), JobNotFound> {
        self.update(id, |job| {
            debug_assert!(!job.status.is_terminal(), "terminal jobs never change status");
            job.status = status;
        })
        .await
    }

    pub async fn begin_file(&self, id: &str, index: usize) -> Result<(), JobNotFound> {
        self.update(id, |job| {
            if let Some(file) = job.files.get_mut(index) {
                debug_assert_eq!(file.status, FileStatus::Pending);
                file.status = FileStatus::Processing;
            }
        })
        .await
    }

    /// Records one file outcome: flips the file status, appends the result
    /// and moves the counters in a single critical section.
    pub async fn complete_file(
        &self,
        id: &str,
        index: usize,
        record: ResultRecord,
    ) -> Result<(), JobNotFound> {
        self.update(id, |job| {
            if let Some(file) = job.files.get_mut(index) {
                file.status = match record.outcome {
                    Outcome::Success => FileStatus::Done,
                    Outcome::Error => FileStatus::Failed,
                };
            }
            if record.outcome == Outcome::Error {
                job.error_count += 1;
            }
            job.results.push(record);
            job.processed_count += 1;
            job.pending_count = job.pending_count.saturating_sub(1);
            job.assert_invariants();
        })
        .await
    }

    pub async fn set_consolidated(&self, id: &str, value: Value) -> Result<(), JobNotFound> {
        self.update(id, |job| {
            debug_assert!(job.consolidated.is_none());
            job.consolidated = Some(value);
        })
        .await
    }

    /// Terminal success: the batch ran to the end, whatever the per-file
    /// outcomes were.
    pub async fn finish(&self, id: &str) -> Result<(), JobNotFound> {
        self.update(id, |job| {
            job.status = JobStatus::Done;
            job.finished_at = Some(Utc::now());
            job.assert_invariants();
        })
        .await
    }

    /// Terminal failure of the pipeline itself, not of a single file.
    pub async fn fail(&self, id: &str, message: impl Into<String>) -> Result<(), JobNotFound> {
        let message = message.into();
        self.update(id, move |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(message);
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    pub async fn status_view(&self, id: &str) -> Option<JobStatusView> {
        self.jobs.read().await.get(id).map(BatchJob::status_view)
    }

    pub async fn result_view(&self, id: &str) -> Option<JobResultView> {
        self.jobs.read().await.get(id).map(BatchJob::result_view)
    }

    async fn update(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut BatchJob),
    ) -> Result<(), JobNotFound> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| JobNotFound(id.to_string()))?;
        mutate(job);
        Ok(())
    }
}

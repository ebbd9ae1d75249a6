//! The seam between the HTTP layer and the application services.
//!
//! Handlers never touch storage, the job store or the model client directly;
//! everything goes through [`IntakeProvider`]. Views carry the wire field
//! names of the public API (Portuguese, kept from the original interface).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Schema-free structured data sheet as returned by the analyzer. Arbitrary
/// extra or missing keys are tolerated by every consumer.
pub type StructuredRecord = Value;

/// One file received through a multipart form, not yet persisted.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field_name: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(
        field_name: impl Into<String>,
        original_name: impl Into<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            original_name: original_name.into(),
            content_type,
            bytes,
        }
    }
}

/// Response for `POST /upload`.
#[derive(Debug, Clone, Serialize)]
pub struct StoredUpload {
    pub filename: String,
    pub originalname: String,
    pub path: String,
}

/// Response for `POST /upload-multiple`; the pipeline runs in the background.
#[derive(Debug, Clone, Serialize)]
pub struct BatchAccepted {
    #[serde(rename = "processamentoId")]
    pub job_id: String,
    #[serde(rename = "totalArquivos")]
    pub total_files: usize,
    pub status: String,
    pub message: String,
}

/// Polling projection of a batch job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub id: String,
    pub status: String,
    #[serde(rename = "totalArquivos")]
    pub total_files: usize,
    #[serde(rename = "processados")]
    pub processed: usize,
    #[serde(rename = "pendentes")]
    pub pending: usize,
    #[serde(rename = "erros")]
    pub errors: usize,
    #[serde(rename = "dataInicio")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "dataFim")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(rename = "progresso")]
    pub progress_percent: u32,
}

/// Full result projection: everything the status view has, plus per-file
/// records, per-file outcomes in submission order and the consolidated sheet
/// once available. Callers distinguish "still polling" from "ready" purely by
/// `status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobResultView {
    #[serde(flatten)]
    pub status: JobStatusView,
    #[serde(rename = "arquivos")]
    pub files: Vec<Value>,
    #[serde(rename = "resultados")]
    pub results: Vec<Value>,
    #[serde(rename = "dadosConsolidados")]
    pub consolidated: Option<Value>,
}

/// Response for the single-document analysis endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisView {
    #[serde(rename = "arquivo")]
    pub file: String,
    #[serde(rename = "dadosAnalisados")]
    pub data: StructuredRecord,
    #[serde(rename = "dataProcessamento")]
    pub processed_at: DateTime<Utc>,
}

/// One stored PDF listed by `GET /arquivos`.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFileInfo {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "tamanho")]
    pub size: u64,
    #[serde(rename = "dataUpload")]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeErrorKind {
    /// Wrong MIME type, oversized file, too many files. Never reaches the
    /// pipeline.
    UploadRejected,
    JobNotFound,
    FileNotFound,
    /// The external model call itself failed.
    Analysis,
    Internal,
}

/// Error crossing the provider seam; the HTTP layer maps it to a status code
/// and `{error, details}` body.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct IntakeError {
    pub kind: IntakeErrorKind,
    pub message: String,
}

impl IntakeError {
    pub fn upload_rejected(message: impl Into<String>) -> Self {
        Self {
            kind: IntakeErrorKind::UploadRejected,
            message: message.into(),
        }
    }

    pub fn job_not_found() -> Self {
        Self {
            kind: IntakeErrorKind::JobNotFound,
            message: "Processamento não encontrado.".to_string(),
        }
    }

    pub fn file_not_found() -> Self {
        Self {
            kind: IntakeErrorKind::FileNotFound,
            message: "Arquivo não encontrado.".to_string(),
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self {
            kind: IntakeErrorKind::Analysis,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: IntakeErrorKind::Internal,
            message: message.into(),
        }
    }
}

/// Application services consumed by the HTTP handlers.
#[async_trait]
pub trait IntakeProvider: Send + Sync {
    /// Persist a single uploaded file without analyzing it.
    async fn store_upload(&self, file: UploadedFile) -> Result<StoredUpload, IntakeError>;

    /// Persist a batch of files, create a job and start its pipeline in the
    /// background. Returns immediately with the job id.
    async fn create_batch(&self, files: Vec<UploadedFile>) -> Result<BatchAccepted, IntakeError>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatusView, IntakeError>;

    async fn job_result(&self, job_id: &str) -> Result<JobResultView, IntakeError>;

    /// Analyze a previously stored file against the fixed ficha template.
    async fn analyze_stored(&self, filename: &str) -> Result<AnalysisView, IntakeError>;

    /// Analyze `document` using the text layer of `template` as the template
    /// hint instead of the fixed one.
    async fn analyze_with_template(
        &self,
        document: UploadedFile,
        template: UploadedFile,
    ) -> Result<AnalysisView, IntakeError>;

    async fn list_stored(&self) -> Result<Vec<StoredFileInfo>, IntakeError>;
}

//! Production [`IntakeProvider`]: upload storage, the job store and the
//! analyzer wired together behind the HTTP seam.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use fichario_server::{
    AnalysisView, BatchAccepted, IntakeError, IntakeProvider, JobResultView, JobStatusView,
    StoredFileInfo, StoredUpload, UploadedFile,
};

use crate::pdf::extract_text_from_pdf;
use crate::pipeline::run_batch;
use crate::services::analyzer::{
    AnalyzerInput, DocumentAnalyzer, FICHA_TEMPLATE, IngestionMode,
};
use crate::services::jobs::{FileRecord, FileStatus, JobStore};
use crate::services::uploads::{UploadError, UploadStore};

const BATCH_ACCEPTED_MESSAGE: &str =
    "Processamento iniciado. Use o ID para acompanhar o progresso.";

pub struct DefaultIntakeProvider {
    uploads: Arc<UploadStore>,
    jobs: JobStore,
    analyzer: Arc<dyn DocumentAnalyzer>,
    mode: IngestionMode,
}

impl DefaultIntakeProvider {
    pub fn new(
        uploads: Arc<UploadStore>,
        jobs: JobStore,
        analyzer: Arc<dyn DocumentAnalyzer>,
        mode: IngestionMode,
    ) -> Self {
        Self {
            uploads,
            jobs,
            analyzer,
            mode,
        }
    }

    fn input_for(&self, bytes: Vec<u8>) -> Result<AnalyzerInput, IntakeError> {
        match self.mode {
            IngestionMode::Multimodal => Ok(AnalyzerInput::PdfBytes(bytes)),
            IngestionMode::TextLayer => extract_text_from_pdf(&bytes)
                .map(AnalyzerInput::Text)
                .map_err(|error| IntakeError::analysis(error.to_string())),
        }
    }
}

#[async_trait]
impl IntakeProvider for DefaultIntakeProvider {
    async fn store_upload(&self, file: UploadedFile) -> Result<StoredUpload, IntakeError> {
        let stored = self.uploads.save(&file).await.map_err(map_upload_error)?;
        Ok(StoredUpload {
            filename: stored.stored_name,
            originalname: stored.original_name,
            path: stored.path.display().to_string(),
        })
    }

    async fn create_batch(&self, files: Vec<UploadedFile>) -> Result<BatchAccepted, IntakeError> {
        debug_assert!(!files.is_empty(), "handlers reject empty batches");
        let mut records = Vec::with_capacity(files.len());
        for file in &files {
            let stored = self.uploads.save(file).await.map_err(map_upload_error)?;
            records.push(FileRecord {
                stored_name: stored.stored_name,
                original_name: stored.original_name,
                storage_path: stored.path,
                status: FileStatus::Pending,
            });
        }

        let total_files = records.len();
        let job_id = self.jobs.create(records).await;
        tracing::info!(job = %job_id, total_files, "batch accepted");
        tokio::spawn(run_batch(
            self.jobs.clone(),
            Arc::clone(&self.analyzer),
            self.mode,
            job_id.clone(),
        ));

        Ok(BatchAccepted {
            job_id,
            total_files,
            status: "iniciando".to_string(),
            message: BATCH_ACCEPTED_MESSAGE.to_string(),
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusView, IntakeError> {
        self.jobs
            .status_view(job_id)
            .await
            .ok_or_else(IntakeError::job_not_found)
    }

    async fn job_result(&self, job_id: &str) -> Result<JobResultView, IntakeError> {
        self.jobs
            .result_view(job_id)
            .await
            .ok_or_else(IntakeError::job_not_found)
    }

    async fn analyze_stored(&self, filename: &str) -> Result<AnalysisView, IntakeError> {
        let bytes = self.uploads.read(filename).await.map_err(map_upload_error)?;
        let input = self.input_for(bytes)?;
        let data = self
            .analyzer
            .analyze(input, Some(FICHA_TEMPLATE))
            .await
            .map_err(|error| IntakeError::analysis(error.to_string()))?;
        Ok(AnalysisView {
            file: filename.to_string(),
            data,
            processed_at: Utc::now(),
        })
    }

    async fn analyze_with_template(
        &self,
        document: UploadedFile,
        template: UploadedFile,
    ) -> Result<AnalysisView, IntakeError> {
        let stored = self.uploads.save(&document).await.map_err(map_upload_error)?;
        let stored_template = self.uploads.save(&template).await.map_err(map_upload_error)?;
        tracing::debug!(
            document = %stored.stored_name,
            template = %stored_template.stored_name,
            "analyzing with custom template"
        );

        let hint = extract_text_from_pdf(&template.bytes)
            .map_err(|error| IntakeError::analysis(error.to_string()))?;
        let input = self.input_for(document.bytes)?;
        let data = self
            .analyzer
            .analyze(input, Some(&hint))
            .await
            .map_err(|error| IntakeError::analysis(error.to_string()))?;

        Ok(AnalysisView {
            file: stored.stored_name,
            data,
            processed_at: Utc::now(),
        })
    }

    async fn list_stored(&self) -> Result<Vec<StoredFileInfo>, IntakeError> {
        self.uploads.list().await.map_err(map_upload_error)
    }
}

fn map_upload_error(error: UploadError) -> IntakeError {
    match error {
        UploadError::Rejected(message) => IntakeError::upload_rejected(message),
        UploadError::NotFound => IntakeError::file_not_found(),
        error @ UploadError::Io { .. } => IntakeError::internal(error.to_string()),
    }
}

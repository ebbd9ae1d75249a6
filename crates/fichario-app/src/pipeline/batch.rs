//! Sequential batch pipeline.
//!
//! One spawned task per batch; files are analyzed strictly in submission
//! order. A file that cannot be read or analyzed becomes an error record and
//! the pipeline moves on; only faults of the pipeline itself (the job
//! vanishing from the store) flip the whole batch to `erro`.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::pdf::extract_text_from_pdf;
use crate::pipeline::consolidate::consolidate;
use crate::services::analyzer::{
    AnalyzerInput, DocumentAnalyzer, FICHA_TEMPLATE, IngestionMode,
};
use crate::services::jobs::{FileRecord, JobNotFound, JobStatus, JobStore, ResultRecord};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] JobNotFound),
}

/// Entry point for the spawned batch task. Never panics the task; a pipeline
/// fault is recorded on the job instead.
pub async fn run_batch(
    store: JobStore,
    analyzer: Arc<dyn DocumentAnalyzer>,
    mode: IngestionMode,
    job_id: String,
) {
    if let Err(error) = run_batch_inner(&store, analyzer.as_ref(), mode, &job_id).await {
        tracing::error!(job = %job_id, %error, "batch pipeline failed");
        if let Err(missing) = store.fail(&job_id, error.to_string()).await {
            tracing::warn!(job = %job_id, %missing, "could not record the pipeline failure");
        }
    }
}

async fn run_batch_inner(
    store: &JobStore,
    analyzer: &dyn DocumentAnalyzer,
    mode: IngestionMode,
    job_id: &str,
) -> Result<(), PipelineError> {
    store.set_status(job_id, JobStatus::Processing).await?;
    let job = store
        .get(job_id)
        .await
        .ok_or_else(|| JobNotFound(job_id.to_string()))?;
    let total = job.files.len();

    for (index, file) in job.files.iter().enumerate() {
        store.begin_file(job_id, index).await?;
        tracing::info!(
            job = %job_id,
            file = %file.stored_name,
            position = index + 1,
            total,
            "analyzing file"
        );

        let record = match analyze_file(analyzer, mode, file).await {
            Ok(payload) => ResultRecord::success(file, payload),
            Err(message) => {
                tracing::warn!(job = %job_id, file = %file.stored_name, error = %message, "file failed");
                ResultRecord::failure(file, message)
            }
        };
        store.complete_file(job_id, index, record).await?;
    }

    let job = store
        .get(job_id)
        .await
        .ok_or_else(|| JobNotFound(job_id.to_string()))?;
    if let Some(consolidated) = consolidate(analyzer, &job.results, FICHA_TEMPLATE).await {
        store.set_consolidated(job_id, consolidated).await?;
    }

    store.finish(job_id).await?;
    tracing::info!(job = %job_id, "batch finished");
    Ok(())
}

/// Reads the stored bytes and runs one analysis. Errors come back as plain
/// messages; the caller turns them into error records.
async fn analyze_file(
    analyzer: &dyn DocumentAnalyzer,
    mode: IngestionMode,
    file: &FileRecord,
) -> Result<Value, String> {
    let bytes = tokio::fs::read(&file.storage_path).await.map_err(|error| {
        format!(
            "falha ao ler o arquivo {}: {error}",
            file.storage_path.display()
        )
    })?;

    let input = match mode {
        IngestionMode::Multimodal => AnalyzerInput::PdfBytes(bytes),
        IngestionMode::TextLayer => {
            AnalyzerInput::Text(extract_text_from_pdf(&bytes).map_err(|error| error.to_string())?)
        }
    };

    analyzer
        .analyze(input, Some(FICHA_TEMPLATE))
        .await
        .map_err(|error| error.to_string())
}

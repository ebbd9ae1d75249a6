use std::path::PathBuf;

use thiserror::Error;

use crate::config::AppConfigError;
use crate::pdf::PdfTextError;
use crate::services::analyzer::AnalysisError;
use crate::services::uploads::UploadError;
use fichario_server::ServerError;

/// Top-level error for the binary; everything bubbles up here and is printed
/// once.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] AppConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Pdf(#[from] PdfTextError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

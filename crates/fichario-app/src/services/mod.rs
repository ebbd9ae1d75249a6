//! Application services behind the HTTP seam.

pub mod analyzer;
pub mod intake;
pub mod jobs;
pub mod uploads;

pub use analyzer::{
    AnalysisError, AnalyzerInput, DocumentAnalyzer, FICHA_TEMPLATE, GeminiAnalyzer, IngestionMode,
    parse_structured,
};
pub use intake::DefaultIntakeProvider;
pub use jobs::{
    BatchJob, FileRecord, FileStatus, JobNotFound, JobStatus, JobStore, Outcome, ResultRecord,
};
pub use uploads::{StoredFile, UploadError, UploadStore};

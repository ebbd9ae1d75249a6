//! End-to-end pipeline runs against real upload storage and scripted
//! analyzers, without the HTTP layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use fichario_app::pipeline::run_batch;
use fichario_app::services::{
    AnalysisError, AnalyzerInput, DocumentAnalyzer, FileRecord, FileStatus, IngestionMode,
    JobStatus, JobStore, UploadStore,
};
use fichario_server::{StructuredRecord, UploadedFile};

/// Counts calls and either succeeds with a fixed payload or always fails.
struct ScriptedAnalyzer {
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedAnalyzer {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentAnalyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _input: AnalyzerInput,
        _template: Option<&str>,
    ) -> Result<StructuredRecord, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AnalysisError::EmptyResponse);
        }
        Ok(json!({
            "informacoesGerais": {"pais": "Brasil"},
            "localizacao": {"rio": "Paraná"},
        }))
    }
}

fn pdf_upload(name: &str) -> UploadedFile {
    UploadedFile::new(
        "files",
        name,
        Some("application/pdf".to_string()),
        format!("%PDF-1.7 {name}").into_bytes(),
    )
}

async fn store_batch(uploads: &UploadStore, names: &[&str]) -> Vec<FileRecord> {
    let mut records = Vec::new();
    for name in names {
        let stored = uploads.save(&pdf_upload(name)).await.unwrap();
        records.push(FileRecord {
            stored_name: stored.stored_name,
            original_name: stored.original_name,
            storage_path: stored.path,
            status: FileStatus::Pending,
        });
    }
    records
}

#[tokio::test]
async fn mixed_batch_survives_one_unreadable_file() {
    let dir = TempDir::new().unwrap();
    let uploads = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();
    let records = store_batch(&uploads, &["a.pdf", "b.pdf", "c.pdf"]).await;

    // Make the second file unreadable before the pipeline starts.
    tokio::fs::remove_file(&records[1].storage_path).await.unwrap();

    let jobs = JobStore::new();
    let analyzer = ScriptedAnalyzer::succeeding();
    let id = jobs.create(records).await;
    run_batch(
        jobs.clone(),
        analyzer.clone(),
        IngestionMode::Multimodal,
        id.clone(),
    )
    .await;

    let job = jobs.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.processed_count, 3);
    assert_eq!(job.pending_count, 0);
    assert_eq!(job.error_count, 1);
    assert!(job.finished_at.is_some());

    // Results stay in submission order; only the broken file errored.
    assert_eq!(job.results.len(), 3);
    assert_eq!(job.results[0].original_name, "a.pdf");
    assert_eq!(job.results[1].original_name, "b.pdf");
    assert!(job.results[1].error.as_deref().unwrap().contains("falha ao ler"));
    assert!(job.results[0].payload.is_some());
    assert!(job.results[2].payload.is_some());

    // Two per-file analyses plus one consolidation call.
    assert_eq!(analyzer.calls(), 3);
    let consolidated = job.consolidated.unwrap();
    assert_eq!(consolidated["totalProjetos"], 2);
    assert_eq!(consolidated["projetos"][0]["originalname"], "a.pdf");
    assert_eq!(consolidated["projetos"][1]["originalname"], "c.pdf");
    assert!(
        consolidated["textoConsolidado"]
            .as_str()
            .unwrap()
            .starts_with("DADOS CONSOLIDADOS DE 2 PROJETOS:")
    );
}

#[tokio::test]
async fn all_failures_still_conclude_without_consolidation() {
    let dir = TempDir::new().unwrap();
    let uploads = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();
    let records = store_batch(&uploads, &["a.pdf", "b.pdf"]).await;

    let jobs = JobStore::new();
    let analyzer = ScriptedAnalyzer::failing();
    let id = jobs.create(records).await;
    run_batch(
        jobs.clone(),
        analyzer.clone(),
        IngestionMode::Multimodal,
        id.clone(),
    )
    .await;

    let job = jobs.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.error_count, 2);
    assert!(job.consolidated.is_none());
    // One call per file, none for consolidation.
    assert_eq!(analyzer.calls(), 2);
}

#[tokio::test]
async fn progress_reaches_one_hundred_on_completion() {
    let dir = TempDir::new().unwrap();
    let uploads = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();
    let records = store_batch(&uploads, &["only.pdf"]).await;

    let jobs = JobStore::new();
    let id = jobs.create(records).await;
    run_batch(
        jobs.clone(),
        ScriptedAnalyzer::succeeding(),
        IngestionMode::Multimodal,
        id.clone(),
    )
    .await;

    let view = jobs.status_view(&id).await.unwrap();
    assert_eq!(view.status, "concluido");
    assert_eq!(view.progress_percent, 100);
    assert_eq!(view.processed, 1);
    assert_eq!(view.errors, 0);

    let result = jobs.result_view(&id).await.unwrap();
    assert_eq!(result.results[0]["status"], "sucesso");
    assert_eq!(
        result.results[0]["dadosAnalisados"]["informacoesGerais"]["pais"],
        "Brasil"
    );
    assert!(matches!(result.consolidated, Some(Value::Object(_))));
}

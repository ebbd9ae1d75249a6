//! Cross-project consolidation.
//!
//! After every file of a batch has a result, the successful records are
//! flattened into one plain-text digest and sent through the analyzer once
//! more to produce a unified ficha. A consolidation failure never fails the
//! batch; the record degrades to `{totalProjetos, projetos, erro}`.

use serde_json::{Value, json};

use crate::services::analyzer::{AnalyzerInput, DocumentAnalyzer};
use crate::services::jobs::{Outcome, ResultRecord};

/// Sections lifted from each per-file record into the digest, in this order.
const DIGEST_SECTIONS: &[(&str, &str)] = &[
    ("informacoesGerais", "INFORMAÇÕES GERAIS"),
    ("localizacao", "LOCALIZAÇÃO"),
    ("barragemPrincipal", "BARRAGEM PRINCIPAL"),
    ("casaForcaPrincipal", "CASA DE FORÇA PRINCIPAL"),
];

/// Builds the consolidated record, or `None` when no file succeeded. The
/// analyzer is only invoked when there is at least one success.
pub async fn consolidate(
    analyzer: &dyn DocumentAnalyzer,
    results: &[ResultRecord],
    template: &str,
) -> Option<Value> {
    let successes: Vec<&ResultRecord> = results
        .iter()
        .filter(|record| record.outcome == Outcome::Success)
        .collect();
    if successes.is_empty() {
        return None;
    }

    let digest = build_digest(&successes);
    let projects: Vec<Value> = successes
        .iter()
        .map(|record| {
            json!({
                "arquivo": record.file_ref,
                "originalname": record.original_name,
                "dados": record.payload,
            })
        })
        .collect();

    tracing::info!(projects = successes.len(), "consolidating batch results");
    match analyzer
        .analyze(AnalyzerInput::Text(digest.clone()), Some(template))
        .await
    {
        Ok(unified) => Some(json!({
            "totalProjetos": successes.len(),
            "projetos": projects,
            "fichaConsolidada": unified,
            "textoConsolidado": digest,
        })),
        Err(error) => {
            tracing::warn!(%error, "consolidation analysis failed");
            Some(json!({
                "totalProjetos": successes.len(),
                "projetos": projects,
                "erro": error.to_string(),
            }))
        }
    }
}

/// Renders the digest the unified ficha is extracted from. Records without
/// object payloads, or without the known sections, still contribute their
/// header block.
pub fn build_digest(successes: &[&ResultRecord]) -> String {
    debug_assert!(!successes.is_empty());
    let mut digest = format!("DADOS CONSOLIDADOS DE {} PROJETOS:\n\n", successes.len());

    for (index, record) in successes.iter().enumerate() {
        digest.push_str(&format!(
            "=== PROJETO {}: {} ===\n",
            index + 1,
            record.original_name
        ));
        digest.push_str(&format!("Arquivo: {}\n\n", record.file_ref));

        if let Some(Value::Object(data)) = &record.payload {
            for (key, label) in DIGEST_SECTIONS {
                let Some(Value::Object(section)) = data.get(*key) else {
                    continue;
                };
                digest.push_str(label);
                digest.push_str(":\n");
                for (field, value) in section {
                    digest.push_str(&format!("{field}: {}\n", render_value(value)));
                }
                digest.push('\n');
            }
        }

        digest.push_str("\n---\n\n");
    }

    digest
}

/// Strings render bare; anything else keeps its JSON form.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::services::analyzer::AnalysisError;
    use crate::services::jobs::FileRecord;
    use crate::services::jobs::FileStatus;
    use fichario_server::StructuredRecord;

    struct ScriptedAnalyzer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ScriptedAnalyzer {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
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
            Ok(json!({"fichaUnificada": true}))
        }
    }

    fn file(index: usize) -> FileRecord {
        FileRecord {
            stored_name: format!("files-{index}.pdf"),
            original_name: format!("usina-{index}.pdf"),
            storage_path: format!("/tmp/files-{index}.pdf").into(),
            status: FileStatus::Done,
        }
    }

    fn success(index: usize, payload: Value) -> ResultRecord {
        ResultRecord::success(&file(index), payload)
    }

    #[test]
    fn digest_carries_header_blocks_and_sections() {
        let first = success(
            1,
            json!({
                "informacoesGerais": {"pais": "Brasil", "potencia": 1200},
                "localizacao": {"rio": "Tocantins"},
                "ignorada": {"x": 1},
            }),
        );
        let second = success(2, json!({"casaForcaPrincipal": {"tipo": "abrigada"}}));
        let digest = build_digest(&[&first, &second]);

        assert!(digest.starts_with("DADOS CONSOLIDADOS DE 2 PROJETOS:\n\n"));
        assert!(digest.contains("=== PROJETO 1: usina-1.pdf ===\n"));
        assert!(digest.contains("Arquivo: files-1.pdf\n"));
        assert!(digest.contains("INFORMAÇÕES GERAIS:\npais: Brasil\npotencia: 1200\n"));
        assert!(digest.contains("LOCALIZAÇÃO:\nrio: Tocantins\n"));
        assert!(digest.contains("=== PROJETO 2: usina-2.pdf ===\n"));
        assert!(digest.contains("CASA DE FORÇA PRINCIPAL:\ntipo: abrigada\n"));
        assert!(!digest.contains("ignorada"));
        assert_eq!(digest.matches("\n---\n\n").count(), 2);
    }

    #[test]
    fn digest_tolerates_non_object_payloads() {
        let record = success(1, json!("texto solto"));
        let digest = build_digest(&[&record]);
        assert!(digest.contains("=== PROJETO 1: usina-1.pdf ==="));
        assert!(!digest.contains("INFORMAÇÕES GERAIS"));
    }

    #[tokio::test]
    async fn no_successes_means_no_analyzer_call() {
        let analyzer = ScriptedAnalyzer::ok();
        let failures = vec![ResultRecord::failure(&file(1), "ilegível")];
        assert!(consolidate(&analyzer, &failures, "modelo").await.is_none());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_consolidation_has_all_fields() {
        let analyzer = ScriptedAnalyzer::ok();
        let results = vec![
            success(1, json!({"informacoesGerais": {"pais": "Peru"}})),
            ResultRecord::failure(&file(2), "ilegível"),
        ];
        let record = consolidate(&analyzer, &results, "modelo").await.unwrap();

        assert_eq!(record["totalProjetos"], 1);
        assert_eq!(record["projetos"][0]["arquivo"], "files-1.pdf");
        assert_eq!(record["projetos"][0]["originalname"], "usina-1.pdf");
        assert_eq!(record["fichaConsolidada"]["fichaUnificada"], true);
        assert!(
            record["textoConsolidado"]
                .as_str()
                .unwrap()
                .starts_with("DADOS CONSOLIDADOS DE 1 PROJETOS:")
        );
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn analyzer_failure_degrades_to_error_record() {
        let analyzer = ScriptedAnalyzer::failing();
        let results = vec![success(1, json!({}))];
        let record = consolidate(&analyzer, &results, "modelo").await.unwrap();

        assert_eq!(record["totalProjetos"], 1);
        assert!(record.get("fichaConsolidada").is_none());
        assert!(record.get("textoConsolidado").is_none());
        assert!(
            record["erro"]
                .as_str()
                .unwrap()
                .contains("no text parts")
        );
    }
}

//! Gemini-backed document analysis.
//!
//! [`GeminiAnalyzer`] talks to the Generative Language REST API and turns the
//! model's free-text reply into a [`StructuredRecord`]. The model is asked for
//! JSON but never forced into it, so [`parse_structured`] degrades gracefully:
//! a balanced `{...}` block is parsed when present, otherwise the raw reply is
//! wrapped in a fallback record instead of failing the file.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use fichario_server::StructuredRecord;

/// Fixed hydropower ficha técnica layout sent as the default template hint.
pub const FICHA_TEMPLATE: &str = "PAÍS: [preencher]
TIPO DE PROJETO: [preencher]
CONTRATANTE: [preencher]
POTÊNCIA INSTALADA: [preencher] MW
VALOR DO CONTRATO - DATA BASE: [preencher] - [preencher data]
INÍCIO DE OPERAÇÃO: [preencher data]
PERÍODO DE EXECUÇÃO DO PROJETO: [preencher data] – [preencher data]
DURAÇÃO: [preencher] meses
OBJETO: [preencher]

PRINCIPAIS CARACTERISTICAS TÉCNICAS:

LOCALIZAÇÃO
LATITUDE: [preencher]
LONGITUDE: [preencher]
RIO: [preencher]
BACIA: [preencher]
DESVIO
TIPO / VAZÃO DE DESVIO: [preencher] / [preencher] m³/s
RESERVATÓRIO
N.A MÁXIMO NORMAL DE MONTANTE: [preencher] m
ÁREA NO NÍVEL MÁXIMO NORMAL: [preencher] km²
VOLUME NO NÍVEL MÁXIMO NORMAL: [preencher] hm³
BARRAGEM PRINCIPAL
TIPO: [preencher]
ALTURA MÁXIMA: [preencher] m
COMPRIMENTO: [preencher] m
VOLUME: [preencher] m³
BARRAGENS COMPLEMENTARES
TIPO: [preencher]
COMPRIMENTO TOTAL: [preencher] m
ALTURA MÁXIMA: [preencher] m
VOLUME TOTAL: [preencher] m³
VERTEDOURO
TIPO / NÚMERO DE VÃOS: [preencher] / [preencher]
COMPRIMENTO TOTAL / CAPACIDADE/ TR: [preencher] m / [preencher] m³/s / [preencher] anos
CASA DE FORÇA PRINCIPAL
TIPO / NÚMERO DE UNIDADES GERADORAS: [preencher] / [preencher]
TIPO DE TURBINA / POTÊNCIA UNITÁRIA / RENDIMENTO: [preencher] / [preencher] MW/ [preencher] %
QUEDA BRUTA / VAZÃO MÁXIMA TURBINADA: [preencher] m / [preencher] m³/s
CARACTERÍSTICAS ESPECÍFICAS: [preencher]";

const TEXT_PROMPT_HEADER: &str = "Analise o seguinte texto extraído de um documento técnico de engenharia/arquitetura e extraia as informações mais relevantes para uma ficha técnica:";

const DOCUMENT_PROMPT_HEADER: &str = "Analise o documento técnico de engenharia/arquitetura em anexo e extraia as informações mais relevantes para uma ficha técnica.";

const PROMPT_FIELDS: &str = "Extraia e organize as seguintes informações em formato JSON:
- Nome do projeto
- Cliente
- Localização
- Tipo de obra
- Responsáveis técnicos
- Datas importantes
- Especificações técnicas principais
- Dimensões e capacidades
- Materiais utilizados
- Observações relevantes";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// How PDF content reaches the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMode {
    /// Send the raw PDF bytes as an inline part; the model reads text and
    /// drawings alike.
    #[default]
    Multimodal,
    /// Extract the text layer locally and send it as a plain prompt.
    TextLayer,
}

/// Document content handed to an analyzer.
#[derive(Debug, Clone)]
pub enum AnalyzerInput {
    Text(String),
    PdfBytes(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("missing GOOGLE_AI_API_KEY or GEMINI_API_KEY environment variable")]
    MissingApiKey,
    #[error("failed to reach the Gemini API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Gemini API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Gemini response carried no text parts")]
    EmptyResponse,
}

/// Seam between the pipeline and the model backend. Tests swap in scripted
/// implementations; production uses [`GeminiAnalyzer`].
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Analyze one document and return its structured record. `template` is
    /// appended to the prompt as a layout hint when present.
    async fn analyze(
        &self,
        input: AnalyzerInput,
        template: Option<&str>,
    ) -> Result<StructuredRecord, AnalysisError>;
}

/// Client for `models/{model}:generateContent`.
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, api_base: impl Into<String>) -> Self {
        let api_base: String = api_base.into();
        debug_assert!(!api_base.ends_with('/'), "api_base must not carry a trailing slash");
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base,
            model: model.into(),
        }
    }

    /// Reads the key from `GOOGLE_AI_API_KEY`, falling back to
    /// `GEMINI_API_KEY`.
    pub fn from_env(model: impl Into<String>, api_base: impl Into<String>) -> Result<Self, AnalysisError> {
        let api_key = std::env::var("GOOGLE_AI_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| AnalysisError::MissingApiKey)?;
        Ok(Self::new(api_key, model, api_base))
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String, AnalysisError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        );
        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response.json().await?;
        let text: String = body
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.map(|content| content.parts).unwrap_or_default())
            .filter_map(|part| part.text)
            .collect();
        if text.is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl DocumentAnalyzer for GeminiAnalyzer {
    async fn analyze(
        &self,
        input: AnalyzerInput,
        template: Option<&str>,
    ) -> Result<StructuredRecord, AnalysisError> {
        let parts = build_parts(input, template);
        debug_assert!(!parts.is_empty());
        let reply = self.generate(parts).await?;
        tracing::debug!(chars = reply.len(), "model reply received");
        Ok(parse_structured(&reply))
    }
}

fn build_parts(input: AnalyzerInput, template: Option<&str>) -> Vec<Part> {
    match input {
        AnalyzerInput::Text(text) => {
            let mut prompt = format!("{TEXT_PROMPT_HEADER}\n\n{text}\n\n{PROMPT_FIELDS}");
            if let Some(template) = template {
                prompt.push_str(&format!(
                    "\n\nSiga o formato deste modelo de ficha técnica: {template}"
                ));
            }
            vec![Part::text(prompt)]
        }
        AnalyzerInput::PdfBytes(bytes) => {
            let mut prompt = format!("{DOCUMENT_PROMPT_HEADER}\n\n{PROMPT_FIELDS}");
            if let Some(template) = template {
                prompt.push_str(&format!(
                    "\n\nSiga o formato deste modelo de ficha técnica: {template}"
                ));
            }
            vec![
                Part::inline_pdf(&bytes),
                Part::text(prompt),
            ]
        }
    }
}

/// Interprets a model reply. Parses the first balanced `{...}` block as JSON;
/// without one, or when the block is not valid JSON, returns a fallback record
/// carrying the full reply so nothing the model said is lost.
pub fn parse_structured(reply: &str) -> StructuredRecord {
    match extract_json_block(reply) {
        Some(block) => match serde_json::from_str::<Value>(block) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(%error, "model reply had an unparseable JSON block");
                json!({
                    "fullText": reply,
                    "extracted": false,
                    "error": "invalid response format",
                })
            }
        },
        None => json!({
            "fullText": reply,
            "extracted": false,
        }),
    }
}

/// Finds the first balanced brace block, honoring strings and escapes so
/// braces inside JSON string values do not break the scan.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline_pdf(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "application/pdf".to_string(),
                data: BASE64.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

//! Text-layer extraction via Pdfium.
//!
//! Only needed when the analyzer runs in `text_layer` mode or when a template
//! PDF has to be turned into a prompt hint; multimodal analysis ships the raw
//! bytes instead.

use std::env;
use std::path::PathBuf;

use pdfium_render::prelude::{Pdfium, PdfiumError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfTextError {
    #[error("failed to load the Pdfium runtime: {0}")]
    Library(#[from] PdfiumError),

    #[error("failed to load PDF document: {0}")]
    Document(#[source] PdfiumError),

    #[error("failed to extract text for page {page_index}: {source}")]
    PageText {
        page_index: usize,
        #[source]
        source: PdfiumError,
    },
}

/// Extracts the text layer of a PDF, pages joined by blank lines. A scanned
/// document without a text layer yields an empty string, not an error.
pub fn extract_text_from_pdf(bytes: &[u8]) -> Result<String, PdfTextError> {
    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(PdfTextError::Document)?;

    let mut buffer = String::new();
    for (index, page) in document.pages().iter().enumerate() {
        let page_text = page
            .text()
            .map_err(|source| PdfTextError::PageText {
                page_index: index,
                source,
            })?
            .all();
        if page_text.is_empty() {
            continue;
        }
        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(&page_text);
    }
    Ok(buffer)
}

/// Resolution order: `PDFIUM_LIBRARY_PATH` (file or directory), the working
/// directory, then the system library.
fn load_pdfium() -> Result<Pdfium, PdfiumError> {
    if let Some(value) = env::var_os("PDFIUM_LIBRARY_PATH") {
        let path = PathBuf::from(value);
        let lib_path = if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        };
        return Pdfium::bind_to_library(lib_path).map(Pdfium::new);
    }

    match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")) {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(primary) => Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|_| primary),
    }
}

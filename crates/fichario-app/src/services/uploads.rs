//! Disk storage for uploaded PDFs.
//!
//! Stored names are generated as `<field>-<millis>-<random><ext>` so
//! concurrent uploads of the same original name never collide while the
//! extension survives for listing. Reads are confined to the upload
//! directory; a filename that tries to point elsewhere is treated as absent.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;

use fichario_server::{StoredFileInfo, UploadedFile};

const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum UploadError {
    /// The file never reaches disk; maps to a 400 upstream.
    #[error("{0}")]
    Rejected(String),
    #[error("Arquivo não encontrado.")]
    NotFound,
    #[error("failed to access upload storage at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file after it has been persisted.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub stored_name: String,
    pub original_name: String,
    pub path: PathBuf,
}

pub struct UploadStore {
    dir: PathBuf,
    max_file_bytes: u64,
}

impl UploadStore {
    /// Opens the store, creating the directory if needed.
    pub async fn open(dir: PathBuf, max_file_bytes: u64) -> Result<Self, UploadError> {
        debug_assert!(max_file_bytes > 0);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| UploadError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self {
            dir,
            max_file_bytes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validates and persists one upload. Only `application/pdf` within the
    /// size limit is accepted.
    pub async fn save(&self, file: &UploadedFile) -> Result<StoredFile, UploadError> {
        if file.content_type.as_deref() != Some(PDF_MIME) {
            return Err(UploadError::Rejected(
                "Apenas arquivos PDF são permitidos".to_string(),
            ));
        }
        if file.bytes.len() as u64 > self.max_file_bytes {
            return Err(UploadError::Rejected(format!(
                "Arquivo `{}` excede o limite de {} bytes.",
                file.original_name, self.max_file_bytes
            )));
        }

        let stored_name = generate_stored_name(&file.field_name, &file.original_name);
        let path = self.dir.join(&stored_name);
        debug_assert!(path.starts_with(&self.dir));
        tokio::fs::write(&path, &file.bytes)
            .await
            .map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(stored = %stored_name, bytes = file.bytes.len(), "upload persisted");

        Ok(StoredFile {
            stored_name,
            original_name: file.original_name.clone(),
            path,
        })
    }

    /// Reads a stored file back by its generated name.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, UploadError> {
        if !is_plain_filename(filename) {
            return Err(UploadError::NotFound);
        }
        let path = self.dir.join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(UploadError::NotFound)
            }
            Err(source) => Err(UploadError::Io { path, source }),
        }
    }

    /// Lists stored PDFs with size and modification time. Order follows the
    /// directory iterator; callers sort if they care.
    pub async fn list(&self) -> Result<Vec<StoredFileInfo>, UploadError> {
        let mut entries =
            tokio::fs::read_dir(&self.dir)
                .await
                .map_err(|source| UploadError::Io {
                    path: self.dir.clone(),
                    source,
                })?;
        let mut infos = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| UploadError::Io {
                path: self.dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("pdf") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let metadata = entry.metadata().await.map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
            let modified_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            infos.push(StoredFileInfo {
                name: name.to_string(),
                size: metadata.len(),
                modified_at,
            });
        }
        Ok(infos)
    }
}

fn generate_stored_name(field_name: &str, original_name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let suffix: u32 = rand::rng().random_range(0..1_000_000_000);
    let ext = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!("{field_name}-{millis}-{suffix}{ext}")
}

/// A bare file name, no separators and no parent references.
fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains('/')
        && !filename.contains('\\')
        && filename != "."
        && filename != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pdf_upload(field: &str, name: &str, bytes: &[u8]) -> UploadedFile {
        UploadedFile::new(field, name, Some(PDF_MIME.to_string()), bytes.to_vec())
    }

    #[tokio::test]
    async fn save_read_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();

        let stored = store
            .save(&pdf_upload("files", "laudo final.pdf", b"%PDF-1.7 conteudo"))
            .await
            .unwrap();
        assert!(stored.stored_name.starts_with("files-"));
        assert!(stored.stored_name.ends_with(".pdf"));
        assert_eq!(stored.original_name, "laudo final.pdf");

        let bytes = store.read(&stored.stored_name).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7 conteudo");

        let infos = store.list().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, stored.stored_name);
        assert_eq!(infos[0].size, 17);
    }

    #[tokio::test]
    async fn non_pdf_mime_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();

        let upload = UploadedFile::new(
            "file",
            "planilha.xlsx",
            Some("application/vnd.ms-excel".to_string()),
            vec![1, 2, 3],
        );
        let error = store.save(&upload).await.unwrap_err();
        assert!(matches!(error, UploadError::Rejected(_)));
        assert!(error.to_string().contains("Apenas arquivos PDF"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_mime_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();

        let upload = UploadedFile::new("file", "laudo.pdf", None, vec![1]);
        assert!(matches!(
            store.save(&upload).await,
            Err(UploadError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path().to_path_buf(), 8).await.unwrap();

        let upload = pdf_upload("file", "grande.pdf", &[0u8; 9]);
        let error = store.save(&upload).await.unwrap_err();
        assert!(matches!(error, UploadError::Rejected(_)));
    }

    #[tokio::test]
    async fn read_refuses_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();

        assert!(matches!(
            store.read("../../etc/passwd").await,
            Err(UploadError::NotFound)
        ));
        assert!(matches!(store.read("..").await, Err(UploadError::NotFound)));
        assert!(matches!(
            store.read("sub/dir.pdf").await,
            Err(UploadError::NotFound)
        ));
    }

    #[tokio::test]
    async fn read_unknown_name_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();
        assert!(matches!(
            store.read("files-1-1.pdf").await,
            Err(UploadError::NotFound)
        ));
    }

    #[tokio::test]
    async fn stored_names_never_collide_for_same_original() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path().to_path_buf(), 1024).await.unwrap();

        let first = store.save(&pdf_upload("files", "a.pdf", b"%PDF")).await.unwrap();
        let second = store.save(&pdf_upload("files", "a.pdf", b"%PDF")).await.unwrap();
        assert_ne!(first.stored_name, second.stored_name);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}

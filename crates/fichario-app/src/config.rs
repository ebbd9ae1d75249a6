//! Layered configuration: built-in defaults, then `config/settings.*`, then
//! `FICHARIO__*` environment variables (double underscore between levels,
//! e.g. `FICHARIO__SERVER__LISTEN_ADDR`).

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use fichario_server::ServerConfig;

use crate::services::analyzer::{DEFAULT_API_BASE, DEFAULT_MODEL, IngestionMode};

const CONFIG_FILE: &str = "config/settings";
const ENV_PREFIX: &str = "FICHARIO";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve a data directory for this platform")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory uploaded PDFs are persisted under.
    pub upload_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    pub model: String,
    pub api_base: String,
    #[serde(default)]
    pub ingestion: IngestionMode,
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let upload_dir = default_upload_dir()?;
    let config = Config::builder()
        .set_default("server.listen_addr", ServerConfig::default().listen_addr)?
        .set_default("storage.upload_dir", upload_dir.to_string_lossy().as_ref())?
        .set_default("analyzer.model", DEFAULT_MODEL)?
        .set_default("analyzer.api_base", DEFAULT_API_BASE)?
        .set_default("analyzer.ingestion", "multimodal")?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    Ok(config.try_deserialize()?)
}

fn default_upload_dir() -> Result<PathBuf, AppConfigError> {
    let dirs = ProjectDirs::from("dev", "fichario", "fichario")
        .ok_or(AppConfigError::MissingProjectDirs)?;
    Ok(dirs.data_dir().join("uploads"))
}

use std::num::{NonZeroU64, NonZeroUsize};

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default)]
    pub upload: UploadLimitsConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:5000".to_string(),
            upload: UploadLimitsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

/// Volume limits enforced at the upload boundary, not at pipeline scheduling
/// time.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct UploadLimitsConfig {
    #[serde(default = "UploadLimitsConfig::default_max_files")]
    pub max_files: NonZeroUsize,
    #[serde(default = "UploadLimitsConfig::default_max_file_bytes")]
    pub max_file_bytes: NonZeroU64,
}

impl UploadLimitsConfig {
    fn default_max_files() -> NonZeroUsize {
        NonZeroUsize::new(10).expect("default file count bound must be non-zero")
    }

    fn default_max_file_bytes() -> NonZeroU64 {
        NonZeroU64::new(10 * 1024 * 1024).expect("default size bound must be non-zero")
    }

    /// Request body cap derived from the per-file limits, with headroom for
    /// multipart framing.
    pub fn request_body_limit(&self) -> usize {
        let files = self.max_files.get() as u64;
        let payload = files.saturating_mul(self.max_file_bytes.get());
        payload.saturating_add(1024 * 1024) as usize
    }
}

impl Default for UploadLimitsConfig {
    fn default() -> Self {
        Self {
            max_files: Self::default_max_files(),
            max_file_bytes: Self::default_max_file_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "CorsConfig::default_allow_methods")]
    pub allow_methods: Vec<String>,
    #[serde(default = "CorsConfig::default_allow_headers")]
    pub allow_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default = "CorsConfig::default_max_age_secs")]
    pub max_age_secs: u64,
}

impl CorsConfig {
    fn default_allow_methods() -> Vec<String> {
        vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
    }

    fn default_allow_headers() -> Vec<String> {
        vec!["content-type".to_string()]
    }

    fn default_max_age_secs() -> u64 {
        600
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: Vec::new(),
            allow_methods: Self::default_allow_methods(),
            allow_headers: Self::default_allow_headers(),
            allow_credentials: false,
            max_age_secs: Self::default_max_age_secs(),
        }
    }
}

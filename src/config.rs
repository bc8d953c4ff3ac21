// ⚙️ Configuration - immutable value objects loaded once per run
//
// conf/settings.toml:
//
//   [database]
//   path = "data/banks.db"
//
//   [tushare]
//   token = "..."            # or TUSHARE_TOKEN in the environment / .env
//
//   [ingest]
//   chunk_size = 5000
//   pause_ms = 100

use crate::catalog::SourceCatalog;
use crate::error::{IngestError, IngestResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "conf/settings.toml";
pub const TOKEN_ENV_VAR: &str = "TUSHARE_TOKEN";

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StorageConfig {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Clone, PartialEq, Deserialize)]
pub struct TushareConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl TushareConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Keep the token out of logs.
impl std::fmt::Debug for TushareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TushareConfig")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    /// Provider API names, in processing order. Empty = full catalog.
    #[serde(default)]
    pub record_types: Vec<String>,
    #[serde(default = "default_banks_csv")]
    pub banks_csv: PathBuf,
}

impl IngestSettings {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn catalog(&self) -> IngestResult<SourceCatalog> {
        if self.record_types.is_empty() {
            Ok(SourceCatalog::standard())
        } else {
            SourceCatalog::from_api_names(&self.record_types)
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            chunk_size: default_chunk_size(),
            pause_ms: default_pause_ms(),
            record_types: Vec::new(),
            banks_csv: default_banks_csv(),
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_api_url() -> String {
    "http://api.tushare.pro".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    5_000
}

fn default_pause_ms() -> u64 {
    100
}

fn default_banks_csv() -> PathBuf {
    PathBuf::from("conf/banks.csv")
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestConfig {
    pub database: StorageConfig,
    pub tushare: TushareConfig,
    #[serde(default)]
    pub ingest: IngestSettings,
}

impl IngestConfig {
    /// Parse and validate TOML text; `token_override` wins over the file.
    pub fn from_toml_str(text: &str, token_override: Option<String>) -> IngestResult<Self> {
        let mut config: IngestConfig = toml::from_str(text)
            .map_err(|e| IngestError::configuration(format!("invalid settings: {}", e)))?;

        if let Some(token) = token_override.filter(|t| !t.trim().is_empty()) {
            config.tushare.token = token;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to `../path` when run from a subdirectory.
    ///
    /// `TUSHARE_TOKEN` (environment or `.env`) overrides the file's token.
    pub fn load(path: &Path) -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let resolved = resolve_path(path).ok_or_else(|| {
            IngestError::configuration(format!(
                "cannot find settings file {} or ../{}",
                path.display(),
                path.display()
            ))
        })?;

        let text = std::fs::read_to_string(&resolved).map_err(|e| {
            IngestError::configuration(format!("cannot read {}: {}", resolved.display(), e))
        })?;

        Self::from_toml_str(&text, std::env::var(TOKEN_ENV_VAR).ok())
    }

    fn validate(&self) -> IngestResult<()> {
        if self.tushare.token.trim().is_empty() {
            return Err(IngestError::configuration(
                "[tushare] token must not be empty",
            ));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(IngestError::configuration(
                "[database] path must not be empty",
            ));
        }
        if self.ingest.chunk_size == 0 {
            return Err(IngestError::configuration(
                "[ingest] chunk_size must be at least 1",
            ));
        }
        self.ingest
            .catalog()
            .map_err(|e| IngestError::configuration(e.to_string()))?;
        Ok(())
    }
}

fn resolve_path(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if path.is_relative() {
        let parent = Path::new("..").join(path);
        if parent.is_file() {
            return Some(parent);
        }
    }
    None
}

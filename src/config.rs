//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//!
//! ```toml
//! [pubmed]
//! api_key = "..."
//! min_interval_ms = 340
//!
//! [jobs]
//! item_pause_ms = 100
//! recovery = "resume"
//!
//! [storage]
//! data_dir = "./data"
//! corpus_dir = "./corpus"
//! ```

use crate::error::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pubmed: PubMedConfig,
    pub matching: MatchingConfig,
    pub llm: LlmConfig,
    pub jobs: JobsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubMedConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Sent as the E-utilities `tool` parameter.
    pub tool: Option<String>,
    /// Sent as the E-utilities `email` parameter.
    pub email: Option<String>,
    pub min_interval_ms: u64,
    pub search_max_results: u32,
    pub timeout_secs: u64,
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            base_url: crate::client::EUTILS_BASE_URL.to_string(),
            api_key: None,
            tool: Some("refharvest".to_string()),
            email: None,
            min_interval_ms: 340,
            search_max_results: 5,
            timeout_secs: 30,
        }
    }
}

impl PubMedConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub threshold: f64,
    /// Conjoin the first author's surname with every search strategy.
    pub use_author_filter: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: crate::matching::DEFAULT_THRESHOLD,
            use_author_filter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 500,
            timeout_secs: 60,
        }
    }
}

/// What to do with jobs found unfinished at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    #[default]
    Resume,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Pause between two items of the same job.
    pub item_pause_ms: u64,
    /// Upper bound for "list recent jobs".
    pub recent_limit: usize,
    pub recovery: RecoveryPolicy,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            item_pause_ms: 100,
            recent_limit: 20,
            recovery: RecoveryPolicy::Resume,
        }
    }
}

impl JobsConfig {
    pub fn item_pause(&self) -> Duration {
        Duration::from_millis(self.item_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the job/result/entry logs.
    pub data_dir: PathBuf,
    /// Directory receiving `txt/`, `pdf/` and `ref/` artifacts.
    pub corpus_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            corpus_dir: PathBuf::from("corpus"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load `path` if it exists (defaults otherwise), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_toml_file(p)?,
            Some(p) => {
                tracing::debug!(path = %p.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HarvestError::Config(format!("Invalid config: {}", e)))
    }

    /// Override settings from environment-style lookups. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NCBI_API_KEY") {
            self.pubmed.api_key = Some(v);
        }
        if let Some(v) = get("NCBI_EMAIL") {
            self.pubmed.email = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("REFHARVEST_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("REFHARVEST_CORPUS_DIR") {
            self.storage.corpus_dir = PathBuf::from(v);
        }
        if let Some(v) = get("REFHARVEST_LOG") {
            self.logging.level = v;
        }
    }
}

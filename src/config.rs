use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// Chunking and eviction settings, fixed when a document is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Lines per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Resident chunk limit for seekable files
    #[serde(default = "default_file_load_chunks_limit")]
    pub file_load_chunks_limit: usize,

    /// Resident chunk limit for pipes and other streams. Zero or negative
    /// keeps everything in memory.
    #[serde(default = "default_load_chunks_limit")]
    pub load_chunks_limit: i64,

    /// Keep already-read chunks when a grown file is reloaded
    #[serde(default = "default_false")]
    pub watch: bool,

    /// Interval between follow-mode reads
    #[serde(default = "default_follow_interval_ms")]
    pub follow_interval_ms: u64,
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_file_load_chunks_limit() -> usize {
    100
}

fn default_load_chunks_limit() -> i64 {
    -1
}

fn default_follow_interval_ms() -> u64 {
    100
}

fn default_false() -> bool {
    false
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            file_load_chunks_limit: default_file_load_chunks_limit(),
            load_chunks_limit: default_load_chunks_limit(),
            watch: default_false(),
            follow_interval_ms: default_follow_interval_ms(),
        }
    }
}

/// Pattern matching options for searches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_false")]
    pub case_sensitive: bool,

    /// Case-sensitive only when the pattern contains an uppercase letter
    #[serde(default = "default_false")]
    pub smart_case: bool,

    /// Treat patterns as regular expressions instead of literals
    #[serde(default = "default_false")]
    pub regexp: bool,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Default location: `<config dir>/tailpage/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tailpage").join("config.json"))
    }

    /// Load from the default location, falling back to defaults when no file exists.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.file_load_chunks_limit == 0 {
            return Err(ConfigError::ValidationError(
                "file_load_chunks_limit must be at least 1".to_string(),
            ));
        }

        if self.follow_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "follow_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(msg) => write!(f, "IO error: {msg}"),
            ConfigError::ParseError(msg) => write!(f, "Parse error: {msg}"),
            ConfigError::SerializeError(msg) => write!(f, "Serialize error: {msg}"),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

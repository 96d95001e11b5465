// Configuration management module
// All tunables live here; call sites never hard-code sizes or limits.


use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub dimension: u32,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm:latest".to_string(),
            batch_size: 16,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2:latest".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in bytes
    pub max_chunk_size: usize,
    /// Bytes of trailing context carried into the next chunk
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 400,
            overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Logical collection name inside the vector database
    pub collection: String,
    /// How many neighbors to retrieve per query
    pub top_k: usize,
}

impl Default for IndexConfig {
    #[inline]
    fn default() -> Self {
        Self {
            collection: "documents".to_string(),
            top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub cache_ttl_secs: u64,
    /// Whether the canned "no relevant information" answer is cached.
    /// Trades freshness for load shedding on repeated empty queries.
    pub cache_empty_responses: bool,
    pub max_upload_bytes: u64,
    /// Minimum extracted text length for an upload to be accepted
    pub min_text_len: usize,
    pub allowed_extensions: Vec<String>,
}

impl Default for LimitsConfig {
    #[inline]
    fn default() -> Self {
        Self {
            rate_limit_requests: 10,
            rate_limit_window_secs: 60,
            cache_ttl_secs: 3600,
            cache_empty_responses: true,
            max_upload_bytes: 50 * 1024 * 1024,
            min_text_len: 10,
            allowed_extensions: vec!["txt".to_string(), "md".to_string(), "csv".to_string()],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max chunk size: {0} (must be between 100 and 4096)")]
    InvalidMaxChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than max chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid rate limit: requests and window must both be nonzero")]
    InvalidRateLimit,
    #[error("Invalid upload ceiling: must be nonzero")]
    InvalidUploadCeiling,
    #[error("Allowed extension list cannot be empty")]
    EmptyExtensionList,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingConfig::default(),
            index: IndexConfig::default(),
            limits: LimitsConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Default application directory (`~/.docrag`)
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".docrag"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(
            &self.embedding.protocol,
            &self.embedding.host,
            self.embedding.port,
            &self.embedding.model,
        )?;
        validate_endpoint(
            &self.generation.protocol,
            &self.generation.host,
            self.generation.port,
            &self.generation.model,
        )?;

        if self.embedding.batch_size == 0 || self.embedding.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }

        if !(64..=4096).contains(&self.embedding.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimension,
            ));
        }

        if !(100..=4096).contains(&self.chunking.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(self.chunking.max_chunk_size));
        }

        if self.chunking.overlap >= self.chunking.max_chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunking.overlap,
                self.chunking.max_chunk_size,
            ));
        }

        if !(1..=100).contains(&self.index.top_k) {
            return Err(ConfigError::InvalidTopK(self.index.top_k));
        }

        if self.limits.rate_limit_requests == 0 || self.limits.rate_limit_window_secs == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }

        if self.limits.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidUploadCeiling);
        }

        if self.limits.allowed_extensions.is_empty() {
            return Err(ConfigError::EmptyExtensionList);
        }

        Ok(())
    }

    /// Directory holding the embedded vector database
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }

    #[inline]
    pub fn embedding_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(
            &self.embedding.protocol,
            &self.embedding.host,
            self.embedding.port,
        )
    }

    #[inline]
    pub fn generation_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(
            &self.generation.protocol,
            &self.generation.host,
            self.generation.port,
        )
    }
}

fn validate_endpoint(
    protocol: &str,
    host: &str,
    port: u16,
    model: &str,
) -> Result<(), ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }

    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }

    if model.trim().is_empty() {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }

    endpoint_url(protocol, host, port)?;
    Ok(())
}

fn endpoint_url(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    let url_str = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
}

//! Configuration management for Libris.
//!
//! Configuration is merged from three sources, lowest precedence first:
//! - Built-in defaults
//! - An optional YAML file (`LIBRIS_CONFIG`)
//! - Environment variables
//!
//! Command-line flags are applied on top through [`AppConfig::with_overrides`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Default extension for snapshot files.
pub const DEFAULT_INDEX_EXTENSION: &str = "lbx";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Filesystem layout
    pub paths: PathsConfig,

    /// Embedding service settings
    pub embedding: EmbeddingSettings,

    /// Credentials handed to the external answer generator
    pub llm: LlmSettings,

    /// Chunking policy
    pub chunking: ChunkingConfig,

    /// Serve-time retrieval defaults
    pub retrieval: RetrievalConfig,

    /// Query cache
    pub cache: CacheConfig,

    /// Backup retention
    pub backup: BackupConfig,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PathsConfig {
    /// Active snapshot file
    pub index_path: PathBuf,

    /// Folder scanned by ingestion
    pub books_dir: PathBuf,

    /// Folder holding timestamped backups
    pub backup_dir: PathBuf,

    /// Folder for log files written by the process supervisor
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("data/index.lbx"),
            books_dir: PathBuf::from("data/books"),
            backup_dir: PathBuf::from("backups"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddingSettings {
    /// Provider name: "openai" or "mock"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Maximum number of texts per request
    pub batch_size: usize,

    /// API key for the embedding service
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Override for the service base URL
    pub base_url: Option<String>,

    /// Deadline for a single batch request
    pub request_timeout_secs: u64,

    /// Attempts per batch, including the first one
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards
    pub initial_backoff_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 128,
            api_key: None,
            base_url: None,
            request_timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkingConfig {
    /// Chunk length in characters
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,

    /// Chunks shorter than this (after trimming) are dropped
    pub min_chunk_size: usize,

    /// Larger source files are rejected
    pub max_file_size_mb: u64,

    /// PDFs with more pages are rejected
    pub max_pdf_pages: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 200,
            min_chunk_size: 200,
            max_file_size_mb: 20,
            max_pdf_pages: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrievalConfig {
    /// Default number of chunks returned
    pub top_k: usize,

    /// Default minimum cosine similarity
    pub score_threshold: f32,

    /// Keep only the leading results when they are all strong matches
    pub focus_enabled: bool,
    pub focus_top_n: usize,
    pub focus_score_threshold: f32,

    /// Deadline for embedding a query
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            score_threshold: 0.2,
            focus_enabled: true,
            focus_top_n: 5,
            focus_score_threshold: 0.4,
            query_timeout_secs: 10,
        }
    }
}

/// Cache backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

impl FromStr for CacheBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(AppError::Config(format!(
                "Unknown cache backend: '{}'. Supported: memory, redis",
                other
            ))),
        }
    }
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redis => f.write_str("redis"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub backend: CacheBackend,

    /// Entry lifetime in seconds
    pub ttl_secs: u64,

    /// Maximum number of cached queries
    pub capacity: usize,

    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ttl_secs: 3600,
            capacity: 1024,
            redis: RedisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupConfig {
    /// Backups older than this many days are pruned
    pub retention_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    paths: Option<PathsConfig>,
    embedding: Option<EmbeddingSettings>,
    llm: Option<LlmSettings>,
    chunking: Option<ChunkingConfig>,
    retrieval: Option<RetrievalConfig>,
    cache: Option<CacheConfig>,
    backup: Option<BackupConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            paths: PathsConfig::default(),
            embedding: EmbeddingSettings::default(),
            llm: LlmSettings::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            backup: BackupConfig::default(),
            log_level: None,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `LIBRIS_CONFIG`: YAML config file
    /// - `FAISS_PATH`, `BOOKS_DIR`, `BACKUP_DIR`, `LOG_DIR`: filesystem layout
    /// - `BACKUP_RETENTION_DAYS`
    /// - `EMBEDDING_PROVIDER`, `EMBEDDING_MODEL`, `EMBEDDING_DIMENSIONS`,
    ///   `EMBEDDING_BATCH_SIZE`, `OPENAI_API_KEY`, `OPENAI_BASE_URL`
    /// - `LLM_API_KEY`, `LLM_MODEL`
    /// - `CHUNK_SIZE`, `CHUNK_OVERLAP`, `MIN_CHUNK_SIZE`, `MAX_FILE_SIZE_MB`,
    ///   `MAX_PDF_PAGES`
    /// - `TOP_K`, `SCORE_THRESHOLD`
    /// - `CACHE_BACKEND`, `CACHE_TTL`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_DB`
    /// - `LOG_LEVEL`, `NO_COLOR`
    ///
    /// # Example
    /// ```no_run
    /// use libris_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Active index: {:?}", config.paths.index_path);
    /// ```
    pub fn load() -> AppResult<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    pub fn load_from<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(config_file) = lookup("LIBRIS_CONFIG") {
            let path = PathBuf::from(config_file);
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "Config file does not exist: {:?}",
                    path
                )));
            }
            config = config.merge_yaml(&path)?;
            config.config_file = Some(path);
        }

        config.apply_env(&lookup)?;
        Ok(config)
    }

    /// Merge YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(paths) = file.paths {
            result.paths = paths;
        }
        if let Some(embedding) = file.embedding {
            result.embedding = embedding;
        }
        if let Some(llm) = file.llm {
            result.llm = llm;
        }
        if let Some(chunking) = file.chunking {
            result.chunking = chunking;
        }
        if let Some(retrieval) = file.retrieval {
            result.retrieval = retrieval;
        }
        if let Some(cache) = file.cache {
            result.cache = cache;
        }
        if let Some(backup) = file.backup {
            result.backup = backup;
        }
        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        tracing::debug!("Merged config file {:?}", path);
        Ok(result)
    }

    /// Environment variables override YAML config.
    fn apply_env<F>(&mut self, lookup: &F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FAISS_PATH") {
            self.paths.index_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("BOOKS_DIR") {
            self.paths.books_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("BACKUP_DIR") {
            self.paths.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_DIR") {
            self.paths.log_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_var(lookup, "BACKUP_RETENTION_DAYS")? {
            self.backup.retention_days = v;
        }

        if let Some(v) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = parse_var(lookup, "EMBEDDING_DIMENSIONS")? {
            self.embedding.dimensions = v;
        }
        if let Some(v) = parse_var(lookup, "EMBEDDING_BATCH_SIZE")? {
            self.embedding.batch_size = v;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.embedding.base_url = Some(v);
        }

        if let Some(v) = lookup("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        } else if self.llm.api_key.is_none() {
            // The answer generator shares the embedding credential unless told otherwise
            self.llm.api_key = self.embedding.api_key.clone();
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.llm.model = v;
        }

        if let Some(v) = parse_var(lookup, "CHUNK_SIZE")? {
            self.chunking.chunk_size = v;
        }
        if let Some(v) = parse_var(lookup, "CHUNK_OVERLAP")? {
            self.chunking.chunk_overlap = v;
        }
        if let Some(v) = parse_var(lookup, "MIN_CHUNK_SIZE")? {
            self.chunking.min_chunk_size = v;
        }
        if let Some(v) = parse_var(lookup, "MAX_FILE_SIZE_MB")? {
            self.chunking.max_file_size_mb = v;
        }
        if let Some(v) = parse_var(lookup, "MAX_PDF_PAGES")? {
            self.chunking.max_pdf_pages = v;
        }

        if let Some(v) = parse_var(lookup, "TOP_K")? {
            self.retrieval.top_k = v;
        }
        if let Some(v) = parse_var(lookup, "SCORE_THRESHOLD")? {
            self.retrieval.score_threshold = v;
        }

        if let Some(v) = lookup("CACHE_BACKEND") {
            self.cache.backend = v.parse()?;
        }
        if let Some(v) = parse_var(lookup, "CACHE_TTL")? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = lookup("REDIS_HOST") {
            self.cache.redis.host = v;
        }
        if let Some(v) = parse_var(lookup, "REDIS_PORT")? {
            self.cache.redis.port = v;
        }
        if let Some(v) = parse_var(lookup, "REDIS_DB")? {
            self.cache.redis.db = v;
        }

        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = Some(v);
        }
        if lookup("NO_COLOR").is_some() {
            self.no_color = true;
        }

        Ok(())
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        index_path: Option<PathBuf>,
        books_dir: Option<PathBuf>,
        backup_dir: Option<PathBuf>,
        embedding_provider: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(index_path) = index_path {
            self.paths.index_path = index_path;
        }

        if let Some(books_dir) = books_dir {
            self.paths.books_dir = books_dir;
        }

        if let Some(backup_dir) = backup_dir {
            self.paths.backup_dir = backup_dir;
        }

        if let Some(provider) = embedding_provider {
            self.embedding.provider = provider.to_ascii_lowercase();
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Extension used for snapshot and backup files.
    pub fn index_extension(&self) -> String {
        self.paths
            .index_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(DEFAULT_INDEX_EXTENSION)
            .to_string()
    }

    /// Ensure the data, backup and log directories exist.
    pub fn ensure_dirs(&self) -> AppResult<()> {
        let mut dirs = vec![self.paths.backup_dir.clone(), self.paths.log_dir.clone()];
        if let Some(parent) = self.paths.index_path.parent() {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent.to_path_buf());
            }
        }

        for dir in dirs {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    AppError::Config(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// Credential checks happen here so that a missing key is fatal at
    /// startup rather than surfacing on every query.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["openai", "mock"];
        if !known_providers.contains(&self.embedding.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.embedding.provider,
                known_providers.join(", ")
            )));
        }

        if self.embedding.provider == "openai"
            && self
                .embedding
                .api_key
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(AppError::Config(
                "API key not found in environment variable: OPENAI_API_KEY".to_string(),
            ));
        }

        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "Embedding dimensions must be positive".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(AppError::Config(
                "Embedding batch size must be positive".to_string(),
            ));
        }
        if self.embedding.max_attempts == 0 {
            return Err(AppError::Config(
                "Embedding max attempts must be at least 1".to_string(),
            ));
        }

        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(AppError::Config("Chunk size must be positive".to_string()));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(AppError::Config(format!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if chunking.min_chunk_size > chunking.chunk_size {
            return Err(AppError::Config(format!(
                "Minimum chunk size ({}) exceeds chunk size ({})",
                chunking.min_chunk_size, chunking.chunk_size
            )));
        }
        if chunking.max_pdf_pages == 0 {
            return Err(AppError::Config(
                "MAX_PDF_PAGES must be positive".to_string(),
            ));
        }

        let retrieval = &self.retrieval;
        if retrieval.top_k == 0 {
            return Err(AppError::Config("TOP_K must be positive".to_string()));
        }
        if !(-1.0..=1.0).contains(&retrieval.score_threshold) {
            return Err(AppError::Config(format!(
                "Score threshold {} is outside [-1, 1]",
                retrieval.score_threshold
            )));
        }

        if self.backup.retention_days == 0 {
            return Err(AppError::Config(
                "Backup retention must be at least one day".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> AppResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            AppError::Config(format!("Invalid value for {}: '{}' ({})", key, raw, e))
        }),
    }
}

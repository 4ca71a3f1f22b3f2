//! TOML-based configuration for ragcore
//!
//! Every component's settings live in one file (`ragcore.toml`). All sections
//! and fields are optional and fall back to defaults. Values can be
//! overridden by `RAGCORE_*` environment variables, which are also read from
//! a `.env` file when present.
//!
//! # Hot Reloading
//!
//! Use `RagSettingsManager` for lock-free access to the current settings.
//! With `start_watching`, edits to the file are picked up at runtime; an
//! invalid edit is logged and the previous settings are kept.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::llm::client::{GenerationConfig, Provider};
use crate::rag::cache::CacheConfig;
use crate::rag::chunker::ChunkingConfig;
use crate::rag::index::IndexConfig;
use crate::rag::ingest::IngestConfig;
use crate::rag::orchestrator::AnswerOptions;
use crate::rag::search::SearchOptions;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "ragcore.toml";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "RAGCORE_";

/// Root configuration structure loaded from ragcore.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagSettings {
    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Model provider; when absent, providers must be injected in code
    #[serde(default)]
    pub provider: Option<Provider>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============= Section Types =============

/// Retrieval and prompt budgeting defaults for answers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_true")]
    pub diversify: bool,

    #[serde(default = "default_max_per_document")]
    pub max_per_document: usize,

    #[serde(default)]
    pub include_context: bool,

    #[serde(default = "default_context_window")]
    pub context_window: usize,

    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,

    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Generation timeout in milliseconds (None = no timeout)
    #[serde(default)]
    pub generation_timeout_ms: Option<u64>,

    /// Concurrent queries in `batch_search`
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
}

fn default_limit() -> usize {
    5
}

fn default_threshold() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_max_per_document() -> usize {
    2
}

fn default_context_window() -> usize {
    1
}

fn default_max_context_chunks() -> usize {
    5
}

fn default_max_context_tokens() -> usize {
    3000
}

fn default_max_history_turns() -> usize {
    6
}

fn default_search_concurrency() -> usize {
    4
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            threshold: default_threshold(),
            diversify: true,
            max_per_document: default_max_per_document(),
            include_context: false,
            context_window: default_context_window(),
            max_context_chunks: default_max_context_chunks(),
            max_context_tokens: default_max_context_tokens(),
            max_history_turns: default_max_history_turns(),
            generation_timeout_ms: None,
            search_concurrency: default_search_concurrency(),
        }
    }
}

impl RetrievalConfig {
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.limit,
            threshold: self.threshold,
            include_context: self.include_context,
            context_window: self.context_window,
            diversify: self.diversify,
            max_per_document: self.max_per_document,
            ..SearchOptions::default()
        }
    }

    pub fn answer_options(&self) -> AnswerOptions {
        AnswerOptions {
            max_context_chunks: self.max_context_chunks,
            max_context_tokens: self.max_context_tokens,
            max_history_turns: self.max_history_turns,
            search: self.search_options(),
            generation_timeout: self.generation_timeout_ms.map(Duration::from_millis),
            ..AnswerOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local storage, lost on restart
    #[default]
    Memory,
    /// PostgreSQL with the pgvector extension (feature `pgvector`)
    Pgvector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Environment variable holding the database URL
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_url_env: default_database_url_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' has an invalid value '{1}'")]
    InvalidEnvVar(String, String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl From<ConfigError> for crate::types::RagError {
    fn from(err: ConfigError) -> Self {
        crate::types::RagError::Config(err.to_string())
    }
}

impl RagSettings {
    /// Load settings from a TOML file, apply `RAGCORE_*` environment
    /// overrides, and validate the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut settings: RagSettings = toml::from_str(&content)?;
        settings.apply_overrides(std::env::vars())?;
        settings.validate()?;

        Ok(settings)
    }

    /// Parse and validate settings without touching the environment
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: RagSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `RAGCORE_*` overrides from `vars`. Unknown names are ignored.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let applied = match key {
                "CHUNK_STRATEGY" => set(&mut self.chunking.strategy, &name, &value),
                "CHUNK_SIZE" => set(&mut self.chunking.chunk_size, &name, &value),
                "CHUNK_OVERLAP" => set(&mut self.chunking.chunk_overlap, &name, &value),
                "MIN_CHUNK_SIZE" => set(&mut self.chunking.min_chunk_size, &name, &value),
                "CACHE_ENABLED" => set(&mut self.cache.enabled, &name, &value),
                "CACHE_MAX_SIZE" => set(&mut self.cache.max_size, &name, &value),
                "CACHE_TTL_MS" => {
                    let mut ttl = 0u64;
                    set(&mut ttl, &name, &value)?;
                    self.cache.ttl_ms = (ttl > 0).then_some(ttl);
                    Ok(())
                }
                "INDEX_TABLE" => {
                    self.index.table = value.clone();
                    Ok(())
                }
                "INDEX_DIMENSION" => set(&mut self.index.dimension, &name, &value),
                "INGEST_CONCURRENCY" => set(&mut self.ingest.concurrency, &name, &value),
                "BATCH_SIZE" => set(&mut self.ingest.batch_size, &name, &value),
                "BATCH_DELAY_MS" => set(&mut self.ingest.batch_delay_ms, &name, &value),
                "MEMORY_HIGH_WATER" => set(&mut self.ingest.memory_high_water, &name, &value),
                "MAX_CONTEXT_CHUNKS" => set(&mut self.retrieval.max_context_chunks, &name, &value),
                "MAX_CONTEXT_TOKENS" => set(&mut self.retrieval.max_context_tokens, &name, &value),
                "SEARCH_THRESHOLD" => set(&mut self.retrieval.threshold, &name, &value),
                "MAX_TOKENS" => set(&mut self.generation.max_tokens, &name, &value),
                "TEMPERATURE" => set(&mut self.generation.temperature, &name, &value),
                "LOG_LEVEL" => {
                    self.logging.level = value.clone();
                    Ok(())
                }
                "LOG_JSON" => set(&mut self.logging.json, &name, &value),
                "STORAGE_BACKEND" => set(&mut self.storage.backend, &name, &value),
                _ => continue,
            };
            applied?;
            info!(variable = %name, "applied environment override");
        }
        Ok(())
    }

    /// Validate the settings for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: crate::types::RagError| ConfigError::ValidationError(e.to_string());

        self.chunking.validate().map_err(invalid)?;
        self.index.validate().map_err(invalid)?;
        self.ingest.validate().map_err(invalid)?;

        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "cache.max_size must be > 0 when the cache is enabled".to_string(),
            ));
        }

        if self.retrieval.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.max_context_tokens must be > 0".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.threshold) {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.threshold {} is outside [-1, 1]",
                self.retrieval.threshold
            )));
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "generation.temperature {} is outside [0, 2]",
                self.generation.temperature
            )));
        }

        if let Some(Provider::Ollama { dimension, .. }) = &self.provider {
            if *dimension != self.index.dimension {
                return Err(ConfigError::ValidationError(format!(
                    "provider dimension {} does not match index.dimension {}",
                    dimension, self.index.dimension
                )));
            }
        }

        Ok(())
    }

    /// Resolve the database URL for the pgvector backend
    pub fn database_url(&self) -> Result<String, ConfigError> {
        std::env::var(&self.storage.database_url_env)
            .map_err(|_| ConfigError::MissingEnvVar(self.storage.database_url_env.clone()))
    }
}

fn set<T: FromStr>(target: &mut T, name: &str, value: &str) -> Result<(), ConfigError> {
    *target = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvVar(name.to_string(), value.to_string()))?;
    Ok(())
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "pgvector" => Ok(StorageBackend::Pgvector),
            other => Err(ConfigError::ValidationError(format!(
                "unknown storage backend '{}'",
                other
            ))),
        }
    }
}

// ============= Hot Reloading Settings Manager =============

/// Thread-safe settings manager with hot reloading support
pub struct RagSettingsManager {
    settings: Arc<ArcSwap<RagSettings>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
    reload_tx: Option<mpsc::UnboundedSender<()>>,
}

impl RagSettingsManager {
    /// Load `.env` (if any) and the settings file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            info!("Loaded environment from {:?}", env_file);
        }

        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let settings = RagSettings::load(&path)?;

        Ok(Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path: path,
            watcher: RwLock::new(None),
            reload_tx: None,
        })
    }

    /// Create a manager directly from settings. It has no file to reload.
    pub fn from_settings(settings: RagSettings) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            watcher: RwLock::new(None),
            reload_tx: None,
        }
    }

    /// Get the current settings (lockless read)
    pub fn settings(&self) -> Arc<RagSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Manually reload the settings from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading settings from {:?}", self.config_path);

        let settings = RagSettings::load(&self.config_path)?;
        self.settings.store(Arc::new(settings));

        info!("Settings reloaded successfully");
        Ok(())
    }

    /// Start watching the settings file for changes
    pub fn start_watching(&mut self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        self.reload_tx = Some(tx.clone());

        let config_path = self.config_path.clone();
        let settings = Arc::clone(&self.settings);
        let file_name = config_path.file_name().map(|name| name.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                        // debounced in the receiver
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Settings watcher error: {:?}", e);
                }
            }
        })?;

        // Watch the parent directory so editors that replace the file are seen
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let debounce = Duration::from_millis(500);
            let mut last_reload: Option<std::time::Instant> = None;

            while rx.recv().await.is_some() {
                if last_reload.is_some_and(|at| at.elapsed() < debounce) {
                    continue;
                }

                // Let the write finish
                tokio::time::sleep(Duration::from_millis(100)).await;
                while rx.try_recv().is_ok() {}

                match RagSettings::load(&config_path) {
                    Ok(new_settings) => {
                        settings.store(Arc::new(new_settings));
                        info!("Settings hot-reloaded successfully");
                        last_reload = Some(std::time::Instant::now());
                    }
                    Err(e) => {
                        warn!("Failed to hot-reload settings: {}. Keeping previous settings.", e);
                    }
                }
            }
        });

        info!("Settings hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for settings changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
        info!("Settings hot-reload watcher stopped");
    }
}

impl Clone for RagSettingsManager {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            config_path: self.config_path.clone(),
            watcher: RwLock::new(None), // Watcher is not cloned
            reload_tx: self.reload_tx.clone(),
        }
    }
}

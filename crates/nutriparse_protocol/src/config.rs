//! Application configuration.
//!
//! Layered: built-in defaults, then an optional TOML file, then environment
//! variables with the `NUTRIPARSE_` prefix (double underscore separating
//! nesting, e.g. `NUTRIPARSE_QUEUE__MAX_ATTEMPTS=5`).

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7800";
pub const DEFAULT_DB_PATH: &str = "nutriparse.sqlite";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub max_file_size: u64,
    pub max_sync_file_size: u64,
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub parser: ParserConfig,
    pub queue: QueueConfig,
    pub dispatcher: DispatcherConfig,
    pub api: ApiConfig,
    pub ratelimit: RateLimitConfig,
    pub cleanup: CleanupConfig,
    pub callback: CallbackConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * MIB,
            max_sync_file_size: 5 * MIB,
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            parser: ParserConfig::default(),
            queue: QueueConfig::default(),
            dispatcher: DispatcherConfig::default(),
            api: ApiConfig::default(),
            ratelimit: RateLimitConfig::default(),
            cleanup: CleanupConfig::default(),
            callback: CallbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path, or ":memory:" for the in-memory backend.
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub ocr_enabled: bool,
    /// OCR language hints, e.g. ["eng", "chi_sim"].
    pub languages: Vec<String>,
    /// Below this average text density the pipeline tries OCR.
    pub min_chars_per_page: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            languages: vec!["eng".to_string(), "chi_sim".to_string()],
            min_chars_per_page: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub lease_duration_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: 30,
            sweep_interval_secs: 30,
            max_attempts: 3,
        }
    }
}

impl QueueConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Concurrent pipeline slots per worker process.
    pub concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { concurrency: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub sync_deadline_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            sync_deadline_secs: 60,
        }
    }
}

impl ApiConfig {
    pub fn sync_deadline(&self) -> Duration {
        Duration::from_secs(self.sync_deadline_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_minute: 100,
            per_hour: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub retention_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub timeout_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_secs: 2,
            timeout_secs: 30,
        }
    }
}

impl CallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration: defaults < optional file < environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                File::from(path.to_path_buf()).format(FileFormat::Toml),
            );
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("NUTRIPARSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // `#[serde(default)]` on every section fills anything the file and
        // environment left unset.
        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sync_file_size > self.max_file_size {
            return Err(ConfigError::Invalid(
                "max_sync_file_size may not exceed max_file_size".to_string(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.concurrency must be at least 1".to_string(),
            ));
        }
        if self.ratelimit.enabled && (self.ratelimit.per_minute == 0 || self.ratelimit.per_hour == 0)
        {
            return Err(ConfigError::Invalid(
                "ratelimit caps must be nonzero when enabled".to_string(),
            ));
        }
        Ok(())
    }
}

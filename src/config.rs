use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::transfers::TransferSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub lifecycle: LifecycleConfig,
    /// Maximum size of a single uploaded file in bytes
    pub max_upload_size: u64,
    /// Maximum number of files in one transfer
    pub max_files: usize,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    /// Public base URL used in share links. Derived from request headers when unset.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per transfer
    pub storage_dir: PathBuf,
    /// JSON file mirroring the transfer metadata
    pub metadata_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a transfer stays downloadable
    pub ttl: Duration,
    /// How often expired transfers are swept
    pub sweep_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            base_url: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./storage"),
            metadata_file: PathBuf::from("./data/transfers.json"),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(72 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            storage: StorageConfig::default(),
            lifecycle: LifecycleConfig::default(),
            max_upload_size: 512 * 1024 * 1024,
            max_files: 20,
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let bind_address = std::env::var("BIND_ADDRESS").unwrap_or(defaults.node.bind_address);

        let base_url = std::env::var("BASE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let storage_dir = std::env::var("STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.storage_dir);

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let metadata_file = std::env::var("METADATA_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("transfers.json"));

        let ttl = env_number::<u64>("EXPIRE_HOURS")
            .map(|hours| Duration::from_secs(hours.saturating_mul(60 * 60)))
            .unwrap_or(defaults.lifecycle.ttl);

        let sweep_interval = env_number::<u64>("SWEEP_INTERVAL_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.lifecycle.sweep_interval);

        let max_upload_size = env_number::<u64>("MAX_UPLOAD_MB")
            .map(|mb| mb.saturating_mul(1024 * 1024))
            .unwrap_or(defaults.max_upload_size);

        let max_files = env_number("MAX_FILES").unwrap_or(defaults.max_files);

        let config = Config {
            node: NodeConfig {
                bind_address,
                base_url,
            },
            storage: StorageConfig {
                storage_dir,
                metadata_file,
            },
            lifecycle: LifecycleConfig {
                ttl,
                sweep_interval,
            },
            max_upload_size,
            max_files,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lifecycle.ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "EXPIRE_HOURS must be greater than 0".to_string(),
            ));
        }

        if self.lifecycle.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "SWEEP_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.max_files == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_FILES must be greater than 0".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_MB must be greater than 0".to_string(),
            ));
        }

        if self.storage.storage_dir.as_os_str().is_empty()
            || self.storage.metadata_file.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "STORAGE_DIR and METADATA_FILE cannot be empty".to_string(),
            ));
        }

        // Every directory under STORAGE_DIR is treated as a transfer
        if self.storage.metadata_file.starts_with(&self.storage.storage_dir) {
            return Err(ConfigError::ValidationError(
                "METADATA_FILE must not be inside STORAGE_DIR".to_string(),
            ));
        }

        self.transfer_settings().map(|_| ())
    }

    /// Limits handed to the transfer service.
    pub fn transfer_settings(&self) -> Result<TransferSettings, ConfigError> {
        let ttl = chrono::Duration::from_std(self.lifecycle.ttl)
            .map_err(|e| ConfigError::ValidationError(format!("EXPIRE_HOURS out of range: {e}")))?;
        if chrono::Utc::now().checked_add_signed(ttl).is_none() {
            return Err(ConfigError::ValidationError(
                "EXPIRE_HOURS puts expiry past the representable date range".to_string(),
            ));
        }

        Ok(TransferSettings {
            ttl,
            max_files: self.max_files,
            max_file_size: self.max_upload_size,
        })
    }

    /// Request body limit for a full upload: every file at its maximum size.
    pub fn upload_body_limit(&self) -> usize {
        let limit = self.max_upload_size.saturating_mul(self.max_files as u64);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}

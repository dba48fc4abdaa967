//! Archiver configuration
//!
//! Loaded from TOML or JSON. Every section and field has a default, so a
//! partial file is valid.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiverConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub volumes: VolumeConfig,

    #[serde(default)]
    pub compression: CompressionConfig,
}

/// Metadata repository connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL or file path; `sqlite::memory:` keeps metadata in memory
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://archiver.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write daily-rolling log files in addition to the console
    #[serde(default = "default_file_enabled")]
    pub file_enabled: bool,

    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

fn default_file_enabled() -> bool {
    true
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_prefix() -> String {
    "archiver".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_enabled: default_file_enabled(),
            directory: default_log_directory(),
            level: default_log_level(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "default_volume_size_mb")]
    pub default_volume_size_mb: u64,
}

fn default_volume_size_mb() -> u64 {
    100
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            default_volume_size_mb: default_volume_size_mb(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Deflate level for ZIP entries; unset uses the encoder default
    #[serde(default)]
    pub zip_level: Option<i32>,

    /// gzip level (0-9) for `.tar.gz`
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,
}

fn default_gzip_level() -> u32 {
    9
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            zip_level: None,
            gzip_level: default_gzip_level(),
        }
    }
}

impl ArchiverConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

        tracing::info!("Loaded archiver configuration from: {}", path.display());
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?;

        tracing::info!("Loaded archiver configuration from: {}", path.display());
        Ok(config)
    }

    pub fn save_to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved archiver configuration to: {}", path.display());
        Ok(())
    }

    pub fn save_to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved archiver configuration to: {}", path.display());
        Ok(())
    }

    /**
     * Loads the file at `path`, or writes the defaults there when it is absent
     *
     * The format follows the extension: `.json` is JSON, anything else TOML.
     */
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if path.exists() {
            let config = if is_json {
                Self::from_json_file(path)?
            } else {
                Self::from_toml_file(path)?
            };
            config.validate()?;
            return Ok(config);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let config = Self::default();
        if is_json {
            config.save_to_json(path)?;
        } else {
            config.save_to_toml(path)?;
        }
        Ok(config)
    }

    /// Development defaults: verbose logging, metadata kept in memory
    pub fn development() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            logging: LoggingConfig {
                file_enabled: false,
                level: "debug".to_string(),
                ..LoggingConfig::default()
            },
            volumes: VolumeConfig::default(),
            compression: CompressionConfig {
                zip_level: Some(1),
                gzip_level: 1,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            database: DatabaseConfig {
                url: default_database_url(),
                max_connections: 10,
            },
            logging: LoggingConfig::default(),
            volumes: VolumeConfig::default(),
            compression: CompressionConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            eyre::bail!("Database URL must not be empty");
        }

        if self.database.max_connections == 0 {
            eyre::bail!("Database max connections must be greater than 0");
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            eyre::bail!(
                "Unknown log level '{}', expected one of {:?}",
                self.logging.level,
                LOG_LEVELS
            );
        }

        if self.volumes.default_volume_size_mb == 0 {
            eyre::bail!("Default volume size must be greater than 0");
        }

        if self.compression.gzip_level > 9 {
            eyre::bail!("gzip level must be between 0 and 9");
        }

        if let Some(level) = self.compression.zip_level {
            if !(0..=9).contains(&level) {
                eyre::bail!("ZIP deflate level must be between 0 and 9");
            }
        }

        tracing::debug!("Archiver configuration validated successfully");
        Ok(())
    }

    pub fn default_volume_size_bytes(&self) -> u64 {
        self.volumes.default_volume_size_mb.saturating_mul(MIB)
    }
}

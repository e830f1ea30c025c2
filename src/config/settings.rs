//! Configuration settings management
//!
//! This module handles loading configuration from multiple sources,
//! validation, and persistence.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub storage_account: String,
    pub container_name: String,
    /// Upload and download block size; 0 picks one per transfer
    pub block_size_mb: u64,
    pub parallelism: u16,
    /// Streaming upload buffer size
    pub buffer_size_mb: usize,
    pub max_buffers: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            storage_account: String::new(),
            container_name: "azx-files".to_string(),
            block_size_mb: 0,
            parallelism: 5,
            buffer_size_mb: 1,
            max_buffers: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub transfer: TransferConfig,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.transfer;
        let or_unset = |s: &str| if s.is_empty() { "<not set>".to_string() } else { s.to_string() };
        writeln!(f, "debug            = {}", self.debug)?;
        writeln!(f, "storage_account  = {}", or_unset(&t.storage_account))?;
        writeln!(f, "container_name   = {}", or_unset(&t.container_name))?;
        if t.block_size_mb == 0 {
            writeln!(f, "block_size_mb    = auto")?;
        } else {
            writeln!(f, "block_size_mb    = {}", t.block_size_mb)?;
        }
        writeln!(f, "parallelism      = {}", t.parallelism)?;
        writeln!(f, "buffer_size_mb   = {}", t.buffer_size_mb)?;
        write!(f, "max_buffers      = {}", t.max_buffers)
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks required for commands that reach the storage service
    pub fn validate(&self) -> Result<()> {
        if self.transfer.storage_account.is_empty() {
            return Err(TransferError::config(
                "Storage account is required. Set AZURE_STORAGE_ACCOUNT or run 'azx config set storage_account <name>'",
            ));
        }

        if self.transfer.container_name.is_empty() {
            return Err(TransferError::config("Container name is required"));
        }

        if self.transfer.parallelism == 0 {
            return Err(TransferError::config("parallelism must be at least 1"));
        }

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        // Use XDG Base Directory specification on Linux and macOS
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            use std::env;
            let config_dir = if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
                PathBuf::from(xdg_config_home)
            } else {
                let home_dir = env::var("HOME")
                    .map_err(|_| TransferError::config("HOME environment variable not set"))?;
                PathBuf::from(home_dir).join(".config")
            };
            Ok(config_dir.join("azx").join("azx.toml"))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let config_dir = dirs::config_dir()
                .ok_or_else(|| TransferError::config("Unable to determine config directory"))?;
            Ok(config_dir.join("azx").join("azx.toml"))
        }
    }

    pub async fn load() -> Result<Self> {
        load_config().await
    }

    pub async fn save(&self) -> Result<()> {
        save_config(self).await
    }

    /// Update one setting by key, as used by `azx config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let t = &mut self.transfer;
        match key {
            "debug" => self.debug = parse_bool(value),
            "storage_account" => t.storage_account = value.to_string(),
            "container_name" => t.container_name = value.to_string(),
            "block_size_mb" => t.block_size_mb = parse_number(key, value)?,
            "parallelism" => t.parallelism = parse_number(key, value)?,
            "buffer_size_mb" => t.buffer_size_mb = parse_number(key, value)?,
            "max_buffers" => t.max_buffers = parse_number(key, value)?,
            _ => return Err(TransferError::config(format!("Unknown configuration key: {key}"))),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TransferError::config(format!("Invalid value '{value}' for {key}")))
}

/// Load configuration from multiple sources with priority order:
/// 1. Command-line flags (handled by clap)
/// 2. Environment variables
/// 3. Configuration file
/// 4. Default values
pub async fn load_config() -> Result<Config> {
    let config = load_config_no_validation().await?;

    config.validate()?;

    Ok(config)
}

/// Load configuration without validation (for config commands)
pub async fn load_config_no_validation() -> Result<Config> {
    let mut config = Config::default();

    let config_path = Config::get_config_path()?;
    if config_path.exists() {
        config = load_from_file(&config_path).await?;
    }

    load_from_env(&mut config);

    Ok(config)
}

pub async fn load_from_file(path: &Path) -> Result<Config> {
    let contents = tokio::fs::read_to_string(path).await?;

    // Try to parse as TOML first, then JSON as fallback
    if let Ok(config) = toml::from_str::<Config>(&contents) {
        return Ok(config);
    }

    let config = serde_json::from_str::<Config>(&contents)?;
    Ok(config)
}

fn load_from_env(config: &mut Config) {
    apply_env(config, |key| std::env::var(key).ok());
}

/// Apply environment overrides read through `lookup`. Unparseable numbers
/// are ignored.
pub fn apply_env<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("DEBUG") {
        config.debug = parse_bool(&value);
    }

    let t = &mut config.transfer;

    if let Some(value) = lookup("AZURE_STORAGE_ACCOUNT") {
        t.storage_account = value;
    }

    if let Some(value) = lookup("AZURE_STORAGE_CONTAINER") {
        t.container_name = value;
    }

    if let Some(Ok(value)) = lookup("AZX_BLOCK_SIZE_MB").map(|v| v.parse()) {
        t.block_size_mb = value;
    }

    if let Some(Ok(value)) = lookup("AZX_PARALLELISM").map(|v| v.parse()) {
        t.parallelism = value;
    }

    if let Some(Ok(value)) = lookup("AZX_BUFFER_SIZE_MB").map(|v| v.parse()) {
        t.buffer_size_mb = value;
    }

    if let Some(Ok(value)) = lookup("AZX_MAX_BUFFERS").map(|v| v.parse()) {
        t.max_buffers = value;
    }
}

pub async fn save_config(config: &Config) -> Result<()> {
    let config_path = Config::get_config_path()?;
    save_to_file(config, &config_path).await
}

pub async fn save_to_file(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| TransferError::serialization(e.to_string()))?;

    tokio::fs::write(path, contents).await?;

    Ok(())
}

/// Write a default configuration file unless one already exists.
/// Returns the path of the file.
pub async fn init_default_config() -> Result<PathBuf> {
    let config_path = Config::get_config_path()?;

    if !config_path.exists() {
        save_to_file(&Config::default(), &config_path).await?;
    }

    Ok(config_path)
}

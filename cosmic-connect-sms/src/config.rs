//! SMS Sync Configuration
//!
//! Loaded from `~/.config/cosmic-connect/sms.toml`. Every field has a
//! default, so an empty or partial file is valid.

use crate::{Result, SmsError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// SMS synchronization configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Rows requested when a view is seeded or paged
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Seconds to wait for a conversation request before giving up (0 = never)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Conversation snapshot file, none to keep conversations in memory only
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

fn default_page_size() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_path: None,
        }
    }
}

impl SmsConfig {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("cosmic-connect")
            .join("sms.toml")
    }

    /// Load configuration from `path`
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// `SmsError::Configuration` if the file cannot be parsed or fails
    /// validation, `SmsError::Io` if it exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No SMS config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: SmsConfig = toml::from_str(&contents).map_err(|e| {
            SmsError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| SmsError::Configuration(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents)?;

        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SmsError::Configuration(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Request timeout, `None` when the watchdog is disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SmsConfig::default();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert!(config.cache_path.is_none());
    }

    #[test]
    fn test_zero_timeout_disables_watchdog() {
        let config = SmsConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = SmsConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SmsConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms.toml");
        fs::write(&path, "page_size = 25\n").unwrap();

        let config = SmsConfig::load(&path).unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sms.toml");
        let config = SmsConfig {
            page_size: 4,
            request_timeout_secs: 5,
            cache_path: Some(dir.path().join("cache.json")),
        };

        config.save(&path).unwrap();
        assert_eq!(SmsConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms.toml");
        fs::write(&path, "page_size = \"many\"").unwrap();

        let err = SmsConfig::load(&path).unwrap_err();
        assert!(matches!(err, SmsError::Configuration(_)));
        assert!(err.requires_user_action());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms.toml");
        fs::write(&path, "page_size = 0").unwrap();

        assert!(matches!(
            SmsConfig::load(&path),
            Err(SmsError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_path() {
        let path = SmsConfig::default_path();
        assert!(path.ends_with("cosmic-connect/sms.toml"));
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::types::EngineConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl EngineConfig {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/ministore/config.toml` on Unix/macOS, or the
    /// equivalent elsewhere via `dirs::config_dir()`.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("ministore").join("config.toml")
    }

    /// Loads configuration from the default config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`.
    ///
    /// - If the file doesn't exist, returns `EngineConfig::default()`.
    /// - Otherwise parses it as TOML and validates.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: EngineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persist_debounce_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "persist_debounce_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.deep);
        assert_eq!(config.persist_debounce_ms, 300);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "deep = false\nstorage_dir = \"/tmp/state\"\n").unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert!(!config.deep);
        assert_eq!(config.persist_debounce_ms, 300);
        assert_eq!(config.storage_root(), PathBuf::from("/tmp/state"));
    }

    #[test]
    fn zero_debounce_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "persist_debounce_ms = 0\n").unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "deep = \"maybe\"\n").unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn config_path_ends_with_expected() {
        assert!(EngineConfig::config_path().ends_with("ministore/config.toml"));
    }
}

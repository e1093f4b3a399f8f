//! OKG Configuration Management
//!
//! Handles configuration from environment variables and TOML files with
//! defaults that work out of the box.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Document chunking
    pub chunking: ChunkingConfig,

    /// Extraction pipeline
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Overwrite every setting for which `lookup` yields a value
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        // Chunking
        if let Some(value) = lookup("OKG_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_value("OKG_CHUNK_SIZE", value)?;
        }
        if let Some(value) = lookup("OKG_OVERLAP_PERCENT") {
            self.chunking.overlap_percent = parse_value("OKG_OVERLAP_PERCENT", value)?;
        }

        // Pipeline
        if let Some(value) = lookup("OKG_MAX_CONCURRENCY") {
            self.pipeline.max_concurrency = parse_value("OKG_MAX_CONCURRENCY", value)?;
        }
        if let Some(value) = lookup("OKG_STRICT_MODE") {
            self.pipeline.strict_mode = parse_flag("OKG_STRICT_MODE", value)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.json_format = match format.to_lowercase().as_str() {
                "json" => true,
                "text" | "pretty" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LOG_FORMAT".to_string(),
                        value: format,
                    })
                }
            };
        }

        Ok(())
    }

    /// Check value ranges before a run starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunking.chunk_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.chunking.overlap_percent > ChunkingConfig::MAX_OVERLAP_PERCENT {
            return Err(ConfigError::InvalidValue {
                key: "chunking.overlap_percent".to_string(),
                value: self.chunking.overlap_percent.to_string(),
            });
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.max_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_flag(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

/// Document chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,

    /// Overlap between neighbouring chunks, as a percentage of `chunk_size`
    pub overlap_percent: u32,
}

impl ChunkingConfig {
    /// Largest accepted overlap percentage
    pub const MAX_OVERLAP_PERCENT: u32 = 50;
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_percent: 10,
        }
    }
}

/// Extraction pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of chunks extracted at the same time
    pub max_concurrency: usize,

    /// Reject types the ontology does not know instead of passing them through
    pub strict_mode: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            strict_mode: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap_percent, 10);
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert!(!config.pipeline.strict_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup(&[
                ("OKG_CHUNK_SIZE", "500"),
                ("OKG_STRICT_MODE", "yes"),
                ("LOG_FORMAT", "json"),
            ]))
            .unwrap();

        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap_percent, 10);
        assert!(config.pipeline.strict_mode);
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(lookup(&[("OKG_MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "OKG_MAX_CONCURRENCY"));

        assert!(config
            .apply_env(lookup(&[("OKG_STRICT_MODE", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = AppConfig::default();
        config.chunking.overlap_percent = 60;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.chunking.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("okg.toml");
        std::fs::write(
            &path,
            "[chunking]\nchunk_size = 200\n\n[pipeline]\nstrict_mode = true\n",
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.chunking.overlap_percent, 10);
        assert!(config.pipeline.strict_mode);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::FileReadError { .. })
        ));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[chunking\n").unwrap();
        assert!(matches!(
            AppConfig::from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}

//! Application configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::fuzzer::AttackMode;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Fuzzer settings
    pub fuzzer: FuzzerSettings,

    /// HTTP transport settings
    pub transport: TransportConfig,

    /// Anti-CSRF token handling
    pub anti_csrf: AntiCsrfConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level when neither RUST_LOG nor --log-level is given
    pub log_level: String,

    /// Directory for log files (defaults to the data directory)
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerSettings {
    /// Maximum concurrent fuzz processes
    pub max_concurrent: usize,

    /// Delay between dispatching processes in milliseconds
    pub delay_ms: u64,

    /// How payload lists are combined across gaps
    pub attack_mode: AttackMode,

    /// Follow redirects when sending fuzzed requests
    pub follow_redirects: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirect depth when redirects are followed
    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,

    /// Accept invalid TLS certificates (typical for test targets)
    pub accept_invalid_certs: bool,

    /// Scheme used for origin-form request-URIs
    pub default_scheme: String,

    /// Response body size limit in bytes
    pub max_response_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCsrfConfig {
    /// Input names recognised as anti-CSRF tokens (case-insensitive substring match)
    pub token_names: Vec<String>,

    /// Attach token fetch transcripts to results
    pub show_token_requests: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            delay_ms: 0,
            attack_mode: AttackMode::ClusterBomb,
            follow_redirects: true,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_redirects: 10,
            user_agent: format!("gapfuzz/{}", env!("CARGO_PKG_VERSION")),
            accept_invalid_certs: true,
            default_scheme: "https".to_string(),
            max_response_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl Default for AntiCsrfConfig {
    fn default() -> Self {
        Self {
            token_names: [
                "csrf",
                "_csrf",
                "csrftoken",
                "csrf_token",
                "_token",
                "authenticity_token",
                "xsrf",
                "__requestverificationtoken",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            show_token_requests: false,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;

            let config: Config = toml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(e.to_string()))
                .with_context(|| "Failed to parse configuration file")?;

            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else if path.is_some() {
            Err(ConfigError::NotFound(config_path.display().to_string()).into())
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        tracing::info!("Saved configuration to {:?}", config_path);
        Ok(())
    }

    /// Check values the fuzzer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fuzzer.max_concurrent == 0 {
            return Err(ConfigError::ValidationError {
                field: "fuzzer.max_concurrent".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.transport.timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "transport.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if !matches!(self.transport.default_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::ValidationError {
                field: "transport.default_scheme".into(),
                reason: "must be 'http' or 'https'".into(),
            });
        }

        if self.anti_csrf.token_names.iter().all(|n| n.trim().is_empty()) {
            return Err(ConfigError::ValidationError {
                field: "anti_csrf.token_names".into(),
                reason: "at least one token name is required".into(),
            });
        }

        Ok(())
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "gapfuzz", "gapfuzz")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "gapfuzz", "gapfuzz")
            .context("Failed to determine data directory")?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fuzzer.attack_mode, AttackMode::ClusterBomb);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        let mut config = Config::default();
        config.fuzzer.max_concurrent = 3;
        config.fuzzer.attack_mode = AttackMode::Pitchfork;
        config.anti_csrf.show_token_requests = true;
        config.save(Some(path_str)).unwrap();

        let loaded = Config::load(Some(path_str)).unwrap();
        assert_eq!(loaded.fuzzer.max_concurrent, 3);
        assert_eq!(loaded.fuzzer.attack_mode, AttackMode::Pitchfork);
        assert!(loaded.anti_csrf.show_token_requests);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[fuzzer]\ndelay_ms = 250\n").unwrap();

        let loaded = Config::load(path.to_str()).unwrap();
        assert_eq!(loaded.fuzzer.delay_ms, 250);
        assert_eq!(loaded.fuzzer.max_concurrent, 10);
        assert_eq!(loaded.transport.timeout_secs, 30);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(Config::load(path.to_str()).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.fuzzer.max_concurrent = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}

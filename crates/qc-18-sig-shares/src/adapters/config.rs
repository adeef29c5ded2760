//! Configuration providers.

use crate::domain::SigSharesConfig;
use crate::events::ConfigError;
use crate::ports::outbound::ConfigProvider;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Static configuration provider.
///
/// Useful for testing and development. For production, use `TomlConfigProvider`.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: SigSharesConfig,
}

impl StaticConfigProvider {
    #[must_use]
    pub fn new(config: SigSharesConfig) -> Self {
        Self { config }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn sig_shares_config(&self) -> Result<SigSharesConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config.clone())
    }
}

// ============================================================================
// TomlConfigProvider - config loading from a node config file
// ============================================================================

/// Configuration file structure. Other tables in the file are ignored.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sig_shares: SigSharesConfig,
}

/// TOML-based configuration provider.
///
/// # Config File Format
///
/// ```toml
/// [sig_shares]
/// session_timeout_ms = 60000
/// request_timeout_ms = 5000
/// recovery_initial_delay_ms = 2000
/// recovery_max_delay_ms = 10000
/// max_requests_per_peer = 32
/// ```
///
/// Missing keys keep their defaults.
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    config: SigSharesConfig,
}

impl TomlConfigProvider {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.sig_shares.validate()?;
        Ok(Self {
            config: file.sig_shares,
        })
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn sig_shares_config(&self) -> Result<SigSharesConfig, ConfigError> {
        Ok(self.config.clone())
    }
}

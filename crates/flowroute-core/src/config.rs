//! Runtime configuration.
//!
//! Every section has working defaults, so an empty TOML document (or no file
//! at all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default interval between two redirects of the same flow under the
/// RateLimit hook.
pub const DEFAULT_RATE_LIMIT_INTERVAL_SECS: u64 = 3600;

/// Default interval enforced by the Advanced hook's built-in limiter.
pub const DEFAULT_ADVANCED_INTERVAL_SECS: u64 = 3600;

/// Floor applied by the SmartFlowRate hook to any non-zero computed rate.
pub const DEFAULT_MIN_FLOW_RATE: i64 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Name and symbol exposed by the ownership ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipConfig {
    pub name: String,
    pub symbol: String,
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            name: "Redirectable Flow".to_string(),
            symbol: "RFLOW".to_string(),
        }
    }
}

/// Parameters for the hooks the factory deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookSettings {
    pub rate_limit_interval_secs: u64,
    pub advanced_rate_limit_interval_secs: u64,
    pub min_flow_rate: i64,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            rate_limit_interval_secs: DEFAULT_RATE_LIMIT_INTERVAL_SECS,
            advanced_rate_limit_interval_secs: DEFAULT_ADVANCED_INTERVAL_SECS,
            min_flow_rate: DEFAULT_MIN_FLOW_RATE,
        }
    }
}

/// Defaults for flows created without metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    pub default_description: String,
    pub default_image: Option<String>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            default_description: "A continuous flow whose recipient can be redirected.".to_string(),
            default_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FlowrouteConfig {
    pub ownership: OwnershipConfig,
    pub hooks: HookSettings,
    pub descriptor: DescriptorConfig,
}

impl FlowrouteConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: FlowrouteConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ownership.name.trim().is_empty() || self.ownership.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ownership name and symbol must be non-empty".into(),
            ));
        }
        if self.hooks.rate_limit_interval_secs == 0 || self.hooks.advanced_rate_limit_interval_secs == 0
        {
            return Err(ConfigError::Invalid(
                "rate limit intervals must be positive".into(),
            ));
        }
        if self.hooks.min_flow_rate <= 0 {
            return Err(ConfigError::Invalid(format!(
                "min_flow_rate must be positive, got {}",
                self.hooks.min_flow_rate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = FlowrouteConfig::from_toml_str("").unwrap();
        assert_eq!(config, FlowrouteConfig::default());
        assert_eq!(config.hooks.rate_limit_interval_secs, 3600);
        assert_eq!(config.ownership.symbol, "RFLOW");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = FlowrouteConfig::from_toml_str(
            r#"
            [hooks]
            rate_limit_interval_secs = 60

            [ownership]
            name = "Payroll Flow"
            "#,
        )
        .unwrap();
        assert_eq!(config.hooks.rate_limit_interval_secs, 60);
        assert_eq!(config.hooks.min_flow_rate, DEFAULT_MIN_FLOW_RATE);
        assert_eq!(config.ownership.name, "Payroll Flow");
        assert_eq!(config.ownership.symbol, "RFLOW");
    }

    #[test]
    fn rejects_zero_interval() {
        let err = FlowrouteConfig::from_toml_str("[hooks]\nrate_limit_interval_secs = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_positive_min_rate() {
        let err = FlowrouteConfig::from_toml_str("[hooks]\nmin_flow_rate = 0\n").unwrap_err();
        assert!(err.to_string().contains("min_flow_rate"));
    }

    #[test]
    fn toml_roundtrip() {
        let config = FlowrouteConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(FlowrouteConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_is_default() {
        let config = FlowrouteConfig::load("/nonexistent/flowroute.toml").unwrap();
        assert_eq!(config, FlowrouteConfig::default());
    }
}

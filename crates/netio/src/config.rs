//! Link configuration

use burrow_core::{ValidateConfig, validators};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::sniff::ProtocolFeature;

/// Marker sent by a mesh peer as the first bytes of every control link
pub const DEFAULT_PROTOCOL_FEATURE: &str = "ABCDEFGH";

/// Upper bound on the marker length
pub const MAX_PROTOCOL_FEATURE_LEN: usize = 64;

/// Immutable settings shared by every component of a bootstrap or admission loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Control-protocol marker compared against the first bytes of a link
    #[serde(default = "default_protocol_feature")]
    pub protocol_feature: String,
    /// Capacity of the admission token pool
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Time allowed for a peer to present the marker
    #[serde(default = "default_sniff_timeout_ms")]
    pub sniff_timeout_ms: u64,
}

fn default_protocol_feature() -> String {
    DEFAULT_PROTOCOL_FEATURE.to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_sniff_timeout_ms() -> u64 {
    5_000
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            protocol_feature: default_protocol_feature(),
            max_connections: default_max_connections(),
            sniff_timeout_ms: default_sniff_timeout_ms(),
        }
    }
}

impl NetConfig {
    /// Marker as raw bytes
    pub fn protocol_feature(&self) -> ProtocolFeature {
        ProtocolFeature::new(self.protocol_feature.clone().into_bytes())
    }

    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_millis(self.sniff_timeout_ms)
    }

    /// Replace the sniff deadline
    #[must_use]
    pub fn with_sniff_timeout(mut self, timeout: Duration) -> Self {
        self.sniff_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Replace the admission pool capacity
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Replace the control-protocol marker
    #[must_use]
    pub fn with_protocol_feature(mut self, feature: impl Into<String>) -> Self {
        self.protocol_feature = feature.into();
        self
    }

    /// Load configuration from well-known locations and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let config_paths = [
            "burrow.toml",
            "config/burrow.toml",
            "/etc/burrow/burrow.toml",
        ];

        for path in &config_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("BURROW")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, with environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let builder = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("BURROW")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl ValidateConfig for NetConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validators::validate_not_empty(&self.protocol_feature, "protocol_feature")?;
        validators::validate_range(
            self.protocol_feature.len(),
            1,
            MAX_PROTOCOL_FEATURE_LEN,
            "protocol_feature length",
        )?;
        validators::validate_range(self.max_connections, 1, 100_000, "max_connections")?;
        validators::validate_range(self.sniff_timeout_ms, 1, 300_000, "sniff_timeout_ms")?;
        Ok(())
    }
}

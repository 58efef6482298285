//! CLI configuration utilities

use anyhow::{Context, Result};
use burrow_core::ValidateConfig;
use burrow_netio::NetConfig;
use std::path::Path;

/// Load link configuration from an explicit file, or from the default locations
pub fn load_net_config(path: Option<&Path>) -> Result<NetConfig> {
    match path {
        Some(path) => NetConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => NetConfig::load().context("Failed to load configuration"),
    }
}

/// Save link configuration to a JSON file
pub fn save_net_config<P: AsRef<Path>>(config: &NetConfig, path: P) -> Result<()> {
    config.validate()?;
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default configuration file
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    save_net_config(&NetConfig::default(), path)
}

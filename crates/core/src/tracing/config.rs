//! Configuration for tracing and instrumentation
//!
//! This module provides configuration types for setting up tracing with
//! optional OpenTelemetry export.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main instrumentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentationConfig {
    /// Service name for tracing
    pub service_name: String,
    /// Log level filter (e.g., "info", "debug", "burrow_netio=trace")
    pub log_level: String,
    /// Optional OTLP configuration for OpenTelemetry export
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
}

/// OpenTelemetry Protocol (OTLP) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    /// OTLP endpoint URL
    pub endpoint: String,
    /// Optional headers to send with OTLP requests
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            service_name: "burrow".to_string(),
            log_level: "info".to_string(),
            otlp: None,
        }
    }
}

impl InstrumentationConfig {
    /// Create configuration from environment variables
    ///
    /// Supports the following environment variables:
    /// - `OTEL_SERVICE_NAME`: Service name
    /// - `RUST_LOG`: Log level filter
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint URL
    /// - `OTEL_EXPORTER_OTLP_HEADERS`: Comma-separated headers (key=value)
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "burrow".to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let otlp = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .map(|endpoint| OtlpConfig {
                endpoint,
                headers: std::env::var("OTEL_EXPORTER_OTLP_HEADERS")
                    .ok()
                    .and_then(|h| parse_headers(&h)),
            });

        Self {
            service_name,
            log_level,
            otlp,
        }
    }
}

fn parse_headers(raw: &str) -> Option<HashMap<String, String>> {
    let map: HashMap<String, String> = raw
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect();
    if map.is_empty() { None } else { Some(map) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InstrumentationConfig::default();
        assert_eq!(config.service_name, "burrow");
        assert_eq!(config.log_level, "info");
        assert!(config.otlp.is_none());
    }

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers("authorization=Bearer x, tenant=a").unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer x");
        assert_eq!(headers.get("tenant").unwrap(), "a");
        assert!(parse_headers("garbage").is_none());
    }
}

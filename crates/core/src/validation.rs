//! Configuration validation support

use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Trait for validating configuration values
pub trait ValidateConfig: Serialize + for<'de> Deserialize<'de> {
    /// Validate the configuration
    ///
    /// Returns Ok(()) if valid, or an error describing what's wrong
    fn validate(&self) -> Result<(), ConfigError>;

    /// Validate a partial update at a dotted path
    ///
    /// The current value is serialized, the update applied, and the result
    /// deserialized and validated as a whole.
    fn validate_path(&self, path: &str, value: &serde_json::Value) -> Result<(), ConfigError> {
        let mut current_value = serde_json::to_value(self)
            .map_err(|e| ConfigError::Message(format!("Failed to serialize config: {e}")))?;

        if path.is_empty() {
            current_value = value.clone();
        } else {
            apply_path_update(&mut current_value, path, value.clone())?;
        }

        let updated: Self = serde_json::from_value(current_value)
            .map_err(|e| ConfigError::Message(format!("Invalid config after update: {e}")))?;

        updated.validate()
    }
}

fn apply_path_update(
    target: &mut serde_json::Value,
    path: &str,
    value: serde_json::Value,
) -> Result<(), ConfigError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = target;

    for (i, segment) in segments.iter().enumerate() {
        if i == segments.len() - 1 {
            let Some(obj) = current.as_object_mut() else {
                return Err(ConfigError::Message(format!(
                    "Cannot set '{}' on non-object at path '{}'",
                    segment,
                    segments[..i].join(".")
                )));
            };
            obj.insert((*segment).to_string(), value);
            return Ok(());
        }

        current = current
            .as_object_mut()
            .and_then(|obj| obj.get_mut(*segment))
            .ok_or_else(|| {
                ConfigError::Message(format!("Path '{}' not found", segments[..=i].join(".")))
            })?;
    }

    Ok(())
}

/// Common validation helpers
pub mod validators {
    use config::ConfigError;

    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::Message(format!("{field}: cannot be empty")));
        }
        Ok(())
    }

    /// Validate that a value is within range
    pub fn validate_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<(), ConfigError> {
        if value < min || value > max {
            return Err(ConfigError::Message(format!(
                "{field}: must be between {min} and {max}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Listener {
        port: u16,
        name: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Sample {
        listener: Listener,
        limit: usize,
    }

    impl ValidateConfig for Sample {
        fn validate(&self) -> Result<(), ConfigError> {
            validators::validate_range(self.listener.port, 1, u16::MAX, "listener.port")?;
            validators::validate_not_empty(&self.listener.name, "listener.name")?;
            validators::validate_range(self.limit, 1, 10, "limit")
        }
    }

    fn sample() -> Sample {
        Sample {
            listener: Listener {
                port: 8080,
                name: "web".to_string(),
            },
            limit: 5,
        }
    }

    #[test]
    fn test_validators() {
        assert!(validators::validate_not_empty("x", "f").is_ok());
        assert!(validators::validate_not_empty("   ", "f").is_err());
        assert!(validators::validate_range(5, 1, 10, "r").is_ok());
        assert!(validators::validate_range(11, 1, 10, "r").is_err());
    }

    #[test]
    fn test_validate_path_nested_update() {
        let config = sample();
        assert!(config.validate().is_ok());

        assert!(
            config
                .validate_path("listener.port", &serde_json::json!(9090))
                .is_ok()
        );

        let err = config
            .validate_path("listener.port", &serde_json::json!(0))
            .unwrap_err();
        assert!(err.to_string().contains("listener.port"));
    }

    #[test]
    fn test_validate_path_unknown_segment() {
        let config = sample();
        let err = config
            .validate_path("missing.port", &serde_json::json!(1))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_validate_path_type_mismatch() {
        let config = sample();
        let err = config
            .validate_path("limit", &serde_json::json!("many"))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid config after update"));
    }
}

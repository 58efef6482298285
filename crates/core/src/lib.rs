//! Shared configuration and observability support for Burrow

pub mod validation;

#[cfg(feature = "tracing")]
pub mod tracing;

pub use validation::{ValidateConfig, validators};

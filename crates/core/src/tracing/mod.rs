//! Tracing initialization and in-process metrics

pub mod config;
pub mod init;
pub mod metrics;

pub use config::{InstrumentationConfig, OtlpConfig};
pub use init::init_tracing;

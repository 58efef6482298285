use anyhow::Result;
use burrow_core::tracing::{InstrumentationConfig, init_tracing};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for the CLI
///
/// With `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans are exported through the
/// core tracing setup. Otherwise logs go to stderr and, unless disabled, to
/// `<data_dir>/<component>.log`.
pub fn init_logging(
    log_level: Level,
    data_dir: Option<PathBuf>,
    component: &str,
    no_file_log: bool,
) -> Result<()> {
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let mut config = InstrumentationConfig::from_env();
        config.service_name = format!("burrow-{component}");
        if std::env::var("RUST_LOG").is_err() {
            config.log_level = default_filter(log_level);
        }
        return init_tracing(&config);
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    if no_file_log {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
        return Ok(());
    }

    let log_file_path = log_file_path(data_dir, component);
    if let Some(parent) = log_file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_ansi(true))
        .try_init()?;

    Ok(())
}

fn default_filter(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    format!("burrow={level},burrow_netio={level},burrow_core={level}")
}

/// Resolve the state directory: explicit flag, `BURROW_STATE_DIR`, then the platform data dir
pub fn state_dir(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| {
        std::env::var("BURROW_STATE_DIR").map_or_else(
            |_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("burrow")
            },
            PathBuf::from,
        )
    })
}

fn log_file_path(data_dir: Option<PathBuf>, component: &str) -> PathBuf {
    state_dir(data_dir).join(format!("{component}.log"))
}

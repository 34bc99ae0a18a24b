use crate::infrastructure::error::InfraError;
use std::io;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Installs the process-wide subscriber once per run. `RUST_LOG` wins over
/// the `level` argument when set.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), InfraError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("warn,run_sheet_sync={level}")).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid log level '{level}': {error}"))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init(),
    };
    installed.map_err(|error| InfraError::InvalidConfig(format!("logging already initialized: {error}")))
}

//! Lightweight helpers for Greentic telemetry.
//! Installs the shared `tracing` subscriber and records metrics through the
//! `metrics` facade so any exporter the host installs picks them up.

use anyhow::Result;

mod config;
mod labels;
mod recorders;
mod tracing_init;

pub use config::{DEFAULT_FILTER, TelemetryConfig};
pub use labels::TelemetryLabels;
pub use recorders::{record_counter, record_gauge, record_histogram};
pub use tracing_init::{init_tracing, installed_service};

/// Installs the shared telemetry subscriber configured from the environment.
pub fn install(service_name: &str) -> Result<()> {
    init_tracing(&TelemetryConfig::from_env(service_name))
}

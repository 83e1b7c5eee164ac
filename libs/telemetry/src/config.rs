use std::env;

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub json_logs: bool,
    pub default_filter: String,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            json_logs: false,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }

    /// Reads `GSM_SERVICE_NAME`, `GSM_LOG_FORMAT` and `GSM_LOG_FILTER`.
    /// `RUST_LOG` still wins over the filter at subscriber install time.
    pub fn from_env(default_service_name: &str) -> Self {
        let service_name =
            env::var("GSM_SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());
        let json_logs = env::var("GSM_LOG_FORMAT")
            .map(|v| parse_json_format(&v))
            .unwrap_or(false);
        let default_filter = env::var("GSM_LOG_FILTER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        Self {
            service_name,
            json_logs,
            default_filter,
        }
    }
}

fn parse_json_format(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "json" | "structured")
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Label appended to the service name in log output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_label: Option<String>,

    /// OpenTelemetry collector endpoint.  Tracing export is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_url: Option<String>,
}

//! Common configuration types for the live-session crates.

use serde::{Deserialize, Serialize};

/// Default log filter used when neither `RUST_LOG` nor a configured level is present
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

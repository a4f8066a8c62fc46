//! Observability for the live-session core.
//!
//! Logging goes through `tracing` with one target per component
//! (`ls.runtime`, `ls.mesh`, `ls.reconnect`, `ls.media`, `ls.recording`,
//! `ls.signaling`, `ls.whiteboard`). Participant display names and media
//! payloads are never logged, only connection ids and sizes.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `ls_peer_links_active` | Gauge | none | Tracked peer links |
//! | `ls_signals_sent_total` | Counter | `kind` | Outbound negotiation envelopes |
//! | `ls_reconnect_attempts_total` | Counter | `outcome` | Reconnection attempts |
//! | `ls_track_replacements_total` | Counter | `outcome` | Per-link video track swaps |
//! | `ls_recordings_total` | Counter | `delivery` | Finished recordings by destination |
//! | `ls_recording_bytes` | Histogram | none | Size of finished recordings |

pub mod metrics;

use crate::errors::TracingInitError;
use common::config::ObservabilityConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|source| TracingInitError::InvalidFilter {
            filter: config.log_level.clone(),
            source,
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    result?;
    Ok(())
}

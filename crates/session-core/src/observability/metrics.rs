//! Metrics definitions for the live-session core.
//!
//! All metrics use the `ls_` prefix. Labels are bounded:
//! - `kind`: offer, answer, candidate
//! - `outcome`: success, failure, timeout
//! - `delivery`: uploaded, local, failed

use metrics::{counter, gauge, histogram};

/// Set the number of tracked peer links.
///
/// Metric: `ls_peer_links_active`
pub fn set_peer_links_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ls_peer_links_active").set(count as f64);
}

/// Record one outbound negotiation envelope.
///
/// Metric: `ls_signals_sent_total`
/// Labels: `kind`
pub fn record_signal_sent(kind: &'static str) {
    counter!("ls_signals_sent_total", "kind" => kind).increment(1);
}

/// Record the result of one reconnection attempt.
///
/// Metric: `ls_reconnect_attempts_total`
/// Labels: `outcome` (success, failure, timeout)
pub fn record_reconnect_attempt(outcome: &'static str) {
    counter!("ls_reconnect_attempts_total", "outcome" => outcome).increment(1);
}

/// Record the result of replacing the video track on one peer link.
///
/// Metric: `ls_track_replacements_total`
/// Labels: `outcome` (success, failure)
pub fn record_track_replacement(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("ls_track_replacements_total", "outcome" => outcome).increment(1);
}

/// Record a finished recording and where it ended up.
///
/// Metrics: `ls_recordings_total`, `ls_recording_bytes`
/// Labels: `delivery` (uploaded, local, failed)
pub fn record_recording(delivery: &'static str, bytes: usize) {
    counter!("ls_recordings_total", "delivery" => delivery).increment(1);
    #[allow(clippy::cast_precision_loss)]
    histogram!("ls_recording_bytes").record(bytes as f64);
}

//! Live-session error types.
//!
//! Errors fall into the categories returned by [`SessionError::category`].
//! Only [`ErrorCategory::Terminal`] errors and an unsupported recording
//! encoder are meant to reach the owner of a session as hard failures;
//! everything else is logged where it happens and the session carries on.

use common::types::ParticipantId;
use signal_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Why a capture device could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The user or platform refused access.
    #[error("permission denied")]
    PermissionDenied,

    /// The user dismissed the capture picker.
    #[error("capture cancelled")]
    Cancelled,

    /// No usable device, or the device failed to start.
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// Why the tracing subscriber could not be installed.
#[derive(Debug, Error)]
pub enum TracingInitError {
    #[error("Invalid log filter {filter:?}: {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Coarse grouping used for logging and for deciding what to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Channel trouble the reconnection controller will retry.
    Transient,
    /// Camera, microphone or screen capture failures.
    Device,
    /// Failure confined to a single peer connection.
    Negotiation,
    /// Recording, upload or local delivery failures.
    Recording,
    /// Reconnection gave up; a manual restart is needed.
    Terminal,
    /// Caller mistakes and local bookkeeping failures.
    Local,
}

/// Live-session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Signaling channel error: {0}")]
    Channel(String),

    #[error("Signaling channel not confirmed within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Negotiation with {participant_id} failed: {reason}")]
    Negotiation {
        participant_id: ParticipantId,
        reason: String,
    },

    #[error("Track replacement on {participant_id} failed: {reason}")]
    TrackReplacement {
        participant_id: ParticipantId,
        reason: String,
    },

    #[error("No supported recording encoding among {tried:?}")]
    EncoderUnsupported { tried: Vec<String> },

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Local delivery failed: {0}")]
    LocalDelivery(String),

    #[error("Preference storage error: {0}")]
    Preferences(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Taxonomy bucket for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Channel(_) | SessionError::ConnectTimeout(_) | SessionError::Protocol(_) => {
                ErrorCategory::Transient
            }
            SessionError::ReconnectExhausted { .. } => ErrorCategory::Terminal,
            SessionError::Device(_) => ErrorCategory::Device,
            SessionError::Negotiation { .. } | SessionError::TrackReplacement { .. } => {
                ErrorCategory::Negotiation
            }
            SessionError::EncoderUnsupported { .. }
            | SessionError::Recording(_)
            | SessionError::Upload(_)
            | SessionError::LocalDelivery(_) => ErrorCategory::Recording,
            SessionError::Preferences(_)
            | SessionError::PermissionDenied(_)
            | SessionError::SessionClosed
            | SessionError::Internal(_) => ErrorCategory::Local,
        }
    }

    /// Whether the session cannot continue without a manual restart.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.category() == ErrorCategory::Terminal
    }

    /// Message suitable for a user-facing notice (no internal details).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Channel(_) | SessionError::ConnectTimeout(_) | SessionError::Protocol(_) => {
                "Connection to the live session was interrupted".to_string()
            }
            SessionError::ReconnectExhausted { .. } => {
                "Could not reconnect to the live session, please rejoin".to_string()
            }
            SessionError::Device(DeviceError::PermissionDenied) => {
                "Camera or microphone access was denied".to_string()
            }
            SessionError::Device(DeviceError::Cancelled) => "Capture was cancelled".to_string(),
            SessionError::Device(DeviceError::Unavailable(_)) => {
                "Camera or microphone is unavailable".to_string()
            }
            SessionError::Negotiation { .. } | SessionError::TrackReplacement { .. } => {
                "Connection to a participant failed".to_string()
            }
            SessionError::EncoderUnsupported { .. } => {
                "Recording is not supported on this device".to_string()
            }
            SessionError::Recording(_) => "Recording failed".to_string(),
            SessionError::Upload(_) => "Recording upload failed, saved locally instead".to_string(),
            SessionError::LocalDelivery(_) => "Recording could not be saved".to_string(),
            SessionError::PermissionDenied(msg) => msg.clone(),
            SessionError::SessionClosed => "The live session has ended".to_string(),
            SessionError::Preferences(_) | SessionError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            SessionError::Channel("reset".to_string()).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            SessionError::ConnectTimeout(Duration::from_secs(10)).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            SessionError::ReconnectExhausted { attempts: 5 }.category(),
            ErrorCategory::Terminal
        );
        assert_eq!(
            SessionError::Device(DeviceError::Cancelled).category(),
            ErrorCategory::Device
        );
        assert_eq!(
            SessionError::TrackReplacement {
                participant_id: ParticipantId::new("p1"),
                reason: "closed".to_string(),
            }
            .category(),
            ErrorCategory::Negotiation
        );
        assert_eq!(
            SessionError::EncoderUnsupported { tried: vec![] }.category(),
            ErrorCategory::Recording
        );
        assert_eq!(
            SessionError::PermissionDenied("students cannot moderate".to_string()).category(),
            ErrorCategory::Local
        );
    }

    #[test]
    fn test_only_exhaustion_is_terminal() {
        assert!(SessionError::ReconnectExhausted { attempts: 5 }.is_terminal());
        assert!(!SessionError::Channel("eof".to_string()).is_terminal());
        assert!(!SessionError::EncoderUnsupported { tried: vec![] }.is_terminal());
    }

    #[test]
    fn test_user_messages_hide_internal_details() {
        let err = SessionError::Channel("connection refused at 10.0.0.7:3000".to_string());
        assert!(!err.user_message().contains("10.0.0.7"));

        let err = SessionError::Internal("mailbox closed".to_string());
        assert_eq!(err.user_message(), "An internal error occurred");
    }

    #[test]
    fn test_device_error_conversion() {
        let err: SessionError = DeviceError::PermissionDenied.into();
        assert!(matches!(
            err,
            SessionError::Device(DeviceError::PermissionDenied)
        ));
        assert_eq!(err.user_message(), "Camera or microphone access was denied");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            SessionError::ReconnectExhausted { attempts: 5 }.to_string(),
            "Reconnection abandoned after 5 attempts"
        );
        assert_eq!(
            SessionError::Negotiation {
                participant_id: ParticipantId::new("b2"),
                reason: "ice failed".to_string(),
            }
            .to_string(),
            "Negotiation with b2 failed: ice failed"
        );
        assert_eq!(
            SessionError::EncoderUnsupported {
                tried: vec!["video/webm".to_string()],
            }
            .to_string(),
            "No supported recording encoding among [\"video/webm\"]"
        );
    }
}

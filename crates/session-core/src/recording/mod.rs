//! Session recording.
//!
//! [`RecordingPipeline`] drives `idle -> recording -> finalizing -> idle`.
//! The finished [`RecordingArtifact`] is handed to [`deliver`], which
//! uploads it as course material and falls back to a local file.

pub mod delivery;
pub mod pipeline;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use common::types::CourseId;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::errors::SessionError;
use crate::media::MediaStream;

pub use delivery::{deliver, FileSystemDelivery, HttpUploader};
pub use pipeline::RecordingPipeline;

/// Encodings tried in order; the first one the encoder supports wins.
pub const PREFERRED_MIME_TYPES: [&str; 4] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "video/mp4",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Idle,
    Recording,
    /// Encoder stopped, remaining chunks being collected
    Finalizing,
}

/// Platform media encoder.
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Start encoding `stream`. Chunks are sent on `chunks` as they are produced.
    async fn start(
        &self,
        stream: MediaStream,
        mime_type: &str,
        chunks: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn EncoderSession>, SessionError>;
}

/// A running encoder.
#[async_trait]
pub trait EncoderSession: Send + Sync {
    /// Stop encoding. Every chunk has been sent once this returns.
    async fn stop(self: Box<Self>) -> Result<(), SessionError>;
}

/// First preferred encoding the encoder supports.
#[must_use]
pub fn select_mime_type(encoder: &dyn MediaEncoder) -> Option<&'static str> {
    PREFERRED_MIME_TYPES
        .iter()
        .copied()
        .find(|mime| encoder.is_type_supported(mime))
}

/// A finished recording ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub data: Bytes,
    /// Container type without codec parameters
    pub content_type: String,
    pub file_name: String,
    /// Title shown in the course material list
    pub display_name: String,
    pub course_id: Option<CourseId>,
    pub recorded_at: DateTime<Utc>,
}

impl RecordingArtifact {
    #[must_use]
    pub fn new(
        data: Bytes,
        mime_type: &str,
        course_id: Option<CourseId>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let content_type = mime_type
            .split(';')
            .next()
            .unwrap_or(mime_type)
            .trim()
            .to_string();
        let extension = if content_type == "video/mp4" { "mp4" } else { "webm" };
        Self {
            data,
            file_name: format!(
                "session-recording-{}.{extension}",
                recorded_at.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            display_name: format!(
                "Live Session Recording - {}",
                recorded_at.format("%Y-%m-%d")
            ),
            content_type,
            course_id,
            recorded_at,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Uploads recordings as course material.
#[async_trait]
pub trait RecordingUploader: Send + Sync {
    async fn upload(&self, artifact: &RecordingArtifact) -> Result<(), SessionError>;
}

/// Saves recordings somewhere the user can reach them.
#[async_trait]
pub trait LocalDelivery: Send + Sync {
    /// Returns where the recording ended up.
    async fn save(&self, artifact: &RecordingArtifact) -> Result<PathBuf, SessionError>;
}

/// Where a recording ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Uploaded { file_name: String },
    SavedLocally {
        path: PathBuf,
        /// Why the upload was skipped or failed, if one was attempted
        upload_error: Option<String>,
    },
}

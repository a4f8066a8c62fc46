//! Recording upload and local save stand-ins.

use async_trait::async_trait;
use common::types::CourseId;
use session_core::errors::SessionError;
use session_core::recording::{LocalDelivery, RecordingArtifact, RecordingUploader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// What reached a mock delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredRecording {
    pub file_name: String,
    pub display_name: String,
    pub content_type: String,
    pub course_id: Option<CourseId>,
    pub bytes: usize,
}

impl From<&RecordingArtifact> for DeliveredRecording {
    fn from(artifact: &RecordingArtifact) -> Self {
        Self {
            file_name: artifact.file_name.clone(),
            display_name: artifact.display_name.clone(),
            content_type: artifact.content_type.clone(),
            course_id: artifact.course_id.clone(),
            bytes: artifact.len(),
        }
    }
}

/// Uploader that accepts or rejects everything.
#[derive(Debug, Default)]
pub struct MockUploader {
    reject: AtomicBool,
    uploads: Mutex<Vec<DeliveredRecording>>,
}

impl MockUploader {
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rejecting() -> Self {
        let uploader = Self::default();
        uploader.reject.store(true, Ordering::SeqCst);
        uploader
    }

    /// Accepted uploads.
    #[must_use]
    pub fn uploads(&self) -> Vec<DeliveredRecording> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordingUploader for MockUploader {
    async fn upload(&self, artifact: &RecordingArtifact) -> Result<(), SessionError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SessionError::Upload("server returned 500 Internal Server Error".to_string()));
        }
        self.uploads.lock().unwrap().push(artifact.into());
        Ok(())
    }
}

/// Local save target that keeps recordings in memory.
#[derive(Debug, Default)]
pub struct MockLocalDelivery {
    fail: AtomicBool,
    saved: Mutex<Vec<DeliveredRecording>>,
}

impl MockLocalDelivery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing() -> Self {
        let local = Self::default();
        local.fail.store(true, Ordering::SeqCst);
        local
    }

    #[must_use]
    pub fn saved(&self) -> Vec<DeliveredRecording> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalDelivery for MockLocalDelivery {
    async fn save(&self, artifact: &RecordingArtifact) -> Result<PathBuf, SessionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::LocalDelivery("disk full".to_string()));
        }
        self.saved.lock().unwrap().push(artifact.into());
        Ok(PathBuf::from("downloads").join(&artifact.file_name))
    }
}

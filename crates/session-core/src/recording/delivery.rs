//! Recording delivery: upload as course material, or save locally.

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::{DeliveryOutcome, LocalDelivery, RecordingArtifact, RecordingUploader};
use crate::errors::SessionError;
use crate::observability::metrics;

/// Upload timeout. Recordings can be large.
const UPLOAD_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Material type sent with every upload.
const MATERIAL_TYPE: &str = "video";

/// Multipart upload to the course material endpoint.
#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpUploader {
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, token: Option<SecretString>) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(UPLOAD_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "ls.recording", error = %e, "Failed to build HTTP client");
                SessionError::Internal(format!("http client: {e}"))
            })?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl RecordingUploader for HttpUploader {
    #[instrument(skip_all, fields(file_name = %artifact.file_name, bytes = artifact.len()))]
    async fn upload(&self, artifact: &RecordingArtifact) -> Result<(), SessionError> {
        let Some(course_id) = &artifact.course_id else {
            return Err(SessionError::Upload("recording has no course".to_string()));
        };

        let file = Part::bytes(artifact.data.to_vec())
            .file_name(artifact.file_name.clone())
            .mime_str(&artifact.content_type)
            .map_err(|e| SessionError::Upload(format!("content type: {e}")))?;
        let form = Form::new()
            .part("file", file)
            .text("courseId", course_id.to_string())
            .text("type", MATERIAL_TYPE)
            .text("name", artifact.display_name.clone());

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "ls.recording", error = %e, "Upload request failed");
            SessionError::Upload(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            warn!(target: "ls.recording", status = %status, "Upload rejected");
            Err(SessionError::Upload(format!("server returned {status}")))
        }
    }
}

/// Writes recordings into a directory.
#[derive(Debug, Clone)]
pub struct FileSystemDelivery {
    dir: PathBuf,
}

impl FileSystemDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl LocalDelivery for FileSystemDelivery {
    async fn save(&self, artifact: &RecordingArtifact) -> Result<PathBuf, SessionError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SessionError::LocalDelivery(format!("create {}: {e}", self.dir.display())))?;

        // Colons from the timestamp are not portable in file names.
        let path = self.dir.join(artifact.file_name.replace(':', "-"));
        tokio::fs::write(&path, &artifact.data)
            .await
            .map_err(|e| SessionError::LocalDelivery(format!("write {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// Upload when the recording belongs to a course, otherwise or on upload
/// failure save it locally.
///
/// # Errors
///
/// Returns `SessionError::LocalDelivery` when the local save fails too.
pub async fn deliver(
    artifact: &RecordingArtifact,
    uploader: &dyn RecordingUploader,
    local: &dyn LocalDelivery,
) -> Result<DeliveryOutcome, SessionError> {
    let upload_error = if artifact.course_id.is_some() {
        match uploader.upload(artifact).await {
            Ok(()) => {
                metrics::record_recording("uploaded", artifact.len());
                info!(
                    target: "ls.recording",
                    file_name = %artifact.file_name,
                    "Recording saved to course materials"
                );
                return Ok(DeliveryOutcome::Uploaded {
                    file_name: artifact.file_name.clone(),
                });
            }
            Err(e) => {
                warn!(target: "ls.recording", error = %e, "Upload failed, saving locally instead");
                Some(e.to_string())
            }
        }
    } else {
        None
    };

    match local.save(artifact).await {
        Ok(path) => {
            metrics::record_recording("local", artifact.len());
            info!(target: "ls.recording", path = %path.display(), "Recording saved locally");
            Ok(DeliveryOutcome::SavedLocally { path, upload_error })
        }
        Err(e) => {
            metrics::record_recording("failed", artifact.len());
            error!(target: "ls.recording", error = %e, "Recording could not be delivered");
            Err(e)
        }
    }
}

//! Durable audio/video preferences.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::errors::SessionError;

/// The user's last chosen microphone and camera state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPreferences {
    pub video_on: bool,
    pub audio_on: bool,
}

impl Default for MediaPreferences {
    fn default() -> Self {
        Self {
            video_on: true,
            audio_on: true,
        }
    }
}

/// Where preferences survive between sessions.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Load saved preferences; `None` when nothing was saved yet.
    async fn load(&self) -> Result<Option<MediaPreferences>, SessionError>;

    /// Save preferences, replacing what was there.
    async fn save(&self, preferences: MediaPreferences) -> Result<(), SessionError>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn load(&self) -> Result<Option<MediaPreferences>, SessionError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SessionError::Preferences(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| SessionError::Preferences(format!("parse {}: {e}", self.path.display())))
    }

    async fn save(&self, preferences: MediaPreferences) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::Preferences(format!("create {}: {e}", parent.display())))?;
        }
        let body = serde_json::to_vec(&preferences)
            .map_err(|e| SessionError::Preferences(e.to_string()))?;

        // Write then rename: readers never observe a partial file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| SessionError::Preferences(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SessionError::Preferences(format!("rename {}: {e}", self.path.display())))
    }
}

/// In-process store for embedders without durable storage.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    inner: Mutex<Option<MediaPreferences>>,
}

impl MemoryPreferenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with preferences already saved.
    #[must_use]
    pub fn with(preferences: MediaPreferences) -> Self {
        Self {
            inner: Mutex::new(Some(preferences)),
        }
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn load(&self) -> Result<Option<MediaPreferences>, SessionError> {
        Ok(*self.inner.lock().await)
    }

    async fn save(&self, preferences: MediaPreferences) -> Result<(), SessionError> {
        *self.inner.lock().await = Some(preferences);
        Ok(())
    }
}

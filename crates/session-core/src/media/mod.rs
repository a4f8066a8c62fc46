//! Local capture: tracks, streams and the device seam.
//!
//! [`MediaTrack`] is a shared handle. The media layer owns the real capture
//! behind it; this crate only flips `enabled` and calls `stop`, and reads
//! both flags back when computing the local [`MediaFlags`](common::types::MediaFlags).

pub mod controller;
pub mod preferences;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::DeviceError;

pub use controller::{CaptureMode, MediaStateController, ScreenShareOutcome};
pub use preferences::{FilePreferenceStore, MediaPreferences, MemoryPreferenceStore, PreferenceStore};

/// Audio or video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Camera,
    Microphone,
    /// Screen, window or tab capture (video)
    Display,
    /// Audio captured alongside a display
    SystemAudio,
    /// Mixdown of several audio tracks
    Mixed,
}

/// A single capture track.
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl MediaTrack {
    /// Create a live, enabled track with a random id.
    #[must_use]
    pub fn new(kind: TrackKind, source: TrackSource) -> Arc<Self> {
        Self::with_id(Uuid::new_v4().to_string(), kind, source)
    }

    /// Create a live, enabled track with a known id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, kind: TrackKind, source: TrackSource) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            source,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Whether media flows (muted tracks stay live but disabled).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the underlying capture is still running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stop the capture. Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}

/// An ordered set of tracks presented together.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    #[must_use]
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    /// First audio track, if any.
    #[must_use]
    pub fn audio_track(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    /// First video track, if any.
    #[must_use]
    pub fn video_track(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// All audio tracks.
    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    #[must_use]
    pub fn contains_track(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|t| t.id() == track_id)
    }

    /// Stop every track in the stream.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// What to capture from the camera/microphone pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub video: bool,
    pub audio: bool,
}

impl CaptureConstraints {
    /// Camera and microphone.
    pub const CAMERA_AND_MIC: Self = Self {
        video: true,
        audio: true,
    };

    /// Camera only.
    pub const CAMERA_ONLY: Self = Self {
        video: true,
        audio: false,
    };
}

/// Platform capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire camera and/or microphone.
    async fn get_user_media(&self, constraints: CaptureConstraints)
        -> Result<MediaStream, DeviceError>;

    /// Prompt for a display capture, optionally with system audio.
    async fn get_display_media(&self, with_audio: bool) -> Result<MediaStream, DeviceError>;

    /// Mix several audio tracks into one.
    async fn mix_audio(&self, sources: Vec<Arc<MediaTrack>>)
        -> Result<Arc<MediaTrack>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_starts_live_and_enabled() {
        let track = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone);
        assert!(track.is_live());
        assert!(track.is_enabled());

        track.set_enabled(false);
        assert!(!track.is_enabled());
        assert!(track.is_live());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Camera);
        assert!(track.stop());
        assert!(!track.stop());
        assert!(!track.is_live());
    }

    #[test]
    fn test_stream_lookup_by_kind() {
        let video = MediaTrack::with_id("v", TrackKind::Video, TrackSource::Display);
        let audio = MediaTrack::with_id("a", TrackKind::Audio, TrackSource::Microphone);
        let stream = MediaStream::new(vec![video.clone(), audio.clone()]);

        assert_eq!(stream.video_track().map(|t| t.id()), Some("v"));
        assert_eq!(stream.audio_track().map(|t| t.id()), Some("a"));
        assert!(stream.contains_track("a"));
        assert!(!stream.contains_track("x"));

        stream.stop_all();
        assert!(!video.is_live());
        assert!(!audio.is_live());
    }
}

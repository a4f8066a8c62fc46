//! Local media state: toggles, hand raise and screen sharing.

use common::types::MediaFlags;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    CaptureConstraints, MediaDevices, MediaPreferences, MediaStream, MediaTrack, PreferenceStore,
};
use crate::errors::{DeviceError, SessionError};
use crate::mesh::{PeerMeshManager, TrackReplacement};

/// What the outgoing video track is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Camera,
    Screen,
}

/// Result of a screen-share toggle
#[derive(Debug)]
pub struct ScreenShareOutcome {
    /// Local flags after the toggle
    pub flags: MediaFlags,
    /// `false` when the user cancelled the picker
    pub changed: bool,
    /// Per-link replacement results; failures do not undo the toggle
    pub replacements: Vec<TrackReplacement>,
}

/// Owns the local stream and derives the local [`MediaFlags`] from it.
pub struct MediaStateController {
    devices: Arc<dyn MediaDevices>,
    preferences: Arc<dyn PreferenceStore>,
    saved: MediaPreferences,
    local_stream: Option<MediaStream>,
    mode: CaptureMode,
    hand_raised: bool,
    recording: bool,
}

impl MediaStateController {
    pub fn new(devices: Arc<dyn MediaDevices>, preferences: Arc<dyn PreferenceStore>) -> Self {
        Self {
            devices,
            preferences,
            saved: MediaPreferences::default(),
            local_stream: None,
            mode: CaptureMode::Camera,
            hand_raised: false,
            recording: false,
        }
    }

    /// Acquire camera and microphone and apply the saved preferences.
    ///
    /// A device failure leaves the controller without a local stream; the
    /// session still joins and receives remote media.
    ///
    /// # Errors
    ///
    /// Returns the device error when capture could not start.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        match self.preferences.load().await {
            Ok(Some(saved)) => self.saved = saved,
            Ok(None) => {}
            Err(e) => {
                warn!(target: "ls.media", error = %e, "Could not load media preferences, using defaults");
            }
        }

        let stream = self
            .devices
            .get_user_media(CaptureConstraints::CAMERA_AND_MIC)
            .await
            .map_err(|e| {
                warn!(target: "ls.media", error = %e, "Local capture unavailable, joining without media");
                SessionError::Device(e)
            })?;

        if let Some(video) = stream.video_track() {
            video.set_enabled(self.saved.video_on);
        }
        for audio in stream.audio_tracks() {
            audio.set_enabled(self.saved.audio_on);
        }
        self.local_stream = Some(stream);

        info!(
            target: "ls.media",
            video_on = self.saved.video_on,
            audio_on = self.saved.audio_on,
            "Local media initialized"
        );
        Ok(())
    }

    /// Current local flag set.
    #[must_use]
    pub fn flags(&self) -> MediaFlags {
        let enabled = |track: Option<&Arc<MediaTrack>>| track.is_some_and(|t| t.is_enabled() && t.is_live());
        let stream = self.local_stream.as_ref();
        MediaFlags {
            video_on: enabled(stream.and_then(MediaStream::video_track)),
            audio_on: enabled(stream.and_then(MediaStream::audio_track)),
            hand_raised: self.hand_raised,
            screen_sharing: self.mode == CaptureMode::Screen,
            recording: self.recording,
        }
    }

    #[must_use]
    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    #[must_use]
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Flip the microphone. Returns `false` when there is no audio track.
    pub async fn toggle_audio(&mut self) -> bool {
        let Some(track) = self.local_stream.as_ref().and_then(MediaStream::audio_track) else {
            warn!(target: "ls.media", "No audio track to toggle");
            return false;
        };
        track.set_enabled(!track.is_enabled());
        debug!(target: "ls.media", audio_on = track.is_enabled(), "Audio toggled");
        self.persist().await;
        true
    }

    /// Flip the outgoing video. Returns `false` when there is no video track.
    pub async fn toggle_video(&mut self) -> bool {
        let Some(track) = self.local_stream.as_ref().and_then(MediaStream::video_track) else {
            warn!(target: "ls.media", "No video track to toggle");
            return false;
        };
        track.set_enabled(!track.is_enabled());
        debug!(target: "ls.media", video_on = track.is_enabled(), "Video toggled");
        self.persist().await;
        true
    }

    /// Force the microphone off. Returns `true` if it was on.
    pub async fn mute_audio(&mut self) -> bool {
        let Some(track) = self.local_stream.as_ref().and_then(MediaStream::audio_track) else {
            return false;
        };
        if !track.is_enabled() {
            return false;
        }
        track.set_enabled(false);
        self.persist().await;
        true
    }

    /// Flip the raised hand and return the new state.
    pub fn toggle_hand_raise(&mut self) -> bool {
        self.hand_raised = !self.hand_raised;
        self.hand_raised
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// Id of the display track while screen sharing.
    #[must_use]
    pub fn screen_track_id(&self) -> Option<&str> {
        if self.mode != CaptureMode::Screen {
            return None;
        }
        self.local_stream
            .as_ref()
            .and_then(MediaStream::video_track)
            .map(|t| t.id())
    }

    /// Start or stop sharing the screen.
    ///
    /// The new video track is swapped into every live link independently;
    /// per-link failures are reported in the outcome and do not roll back
    /// the local state. A cancelled picker changes nothing.
    ///
    /// # Errors
    ///
    /// Returns a device error when the replacement capture could not start;
    /// local state is left as it was.
    pub async fn toggle_screen_share(
        &mut self,
        mesh: &PeerMeshManager,
    ) -> Result<ScreenShareOutcome, SessionError> {
        match self.mode {
            CaptureMode::Camera => self.start_screen_share(mesh).await,
            CaptureMode::Screen => self.stop_screen_share(mesh).await,
        }
    }

    async fn start_screen_share(
        &mut self,
        mesh: &PeerMeshManager,
    ) -> Result<ScreenShareOutcome, SessionError> {
        let display = match self.devices.get_display_media(false).await {
            Ok(display) => display,
            Err(DeviceError::Cancelled) => {
                info!(target: "ls.media", "Screen share picker cancelled");
                return Ok(self.unchanged());
            }
            Err(e) => {
                warn!(target: "ls.media", error = %e, "Screen capture failed");
                return Err(e.into());
            }
        };
        let Some(screen) = display.video_track().cloned() else {
            display.stop_all();
            return Err(DeviceError::Unavailable("display capture has no video track".to_string()).into());
        };

        let replacements = mesh.replace_video_track(&screen).await;

        let previous = self.local_stream.take();
        let mut tracks = vec![screen];
        if let Some(previous) = &previous {
            if let Some(camera) = previous.video_track() {
                camera.stop();
            }
            tracks.extend(previous.audio_tracks().cloned());
        }
        self.local_stream = Some(MediaStream::new(tracks));
        self.mode = CaptureMode::Screen;

        info!(
            target: "ls.media",
            links = replacements.len(),
            failed = replacements.iter().filter(|r| r.result.is_err()).count(),
            "Screen share started"
        );
        Ok(ScreenShareOutcome {
            flags: self.flags(),
            changed: true,
            replacements,
        })
    }

    async fn stop_screen_share(
        &mut self,
        mesh: &PeerMeshManager,
    ) -> Result<ScreenShareOutcome, SessionError> {
        let camera_stream = self
            .devices
            .get_user_media(CaptureConstraints::CAMERA_ONLY)
            .await
            .map_err(|e| {
                warn!(target: "ls.media", error = %e, "Camera capture failed, still sharing");
                SessionError::Device(e)
            })?;
        let Some(camera) = camera_stream.video_track().cloned() else {
            camera_stream.stop_all();
            return Err(DeviceError::Unavailable("camera capture has no video track".to_string()).into());
        };

        let replacements = mesh.replace_video_track(&camera).await;

        let previous = self.local_stream.take();
        let mut tracks = vec![camera];
        if let Some(previous) = &previous {
            if let Some(screen) = previous.video_track() {
                screen.stop();
            }
            tracks.extend(previous.audio_tracks().cloned());
        }
        self.local_stream = Some(MediaStream::new(tracks));
        self.mode = CaptureMode::Camera;

        info!(
            target: "ls.media",
            links = replacements.len(),
            failed = replacements.iter().filter(|r| r.result.is_err()).count(),
            "Screen share stopped"
        );
        Ok(ScreenShareOutcome {
            flags: self.flags(),
            changed: true,
            replacements,
        })
    }

    /// Stop every local track.
    pub fn stop_all(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
            debug!(target: "ls.media", "Local tracks stopped");
        }
        self.mode = CaptureMode::Camera;
    }

    fn unchanged(&self) -> ScreenShareOutcome {
        ScreenShareOutcome {
            flags: self.flags(),
            changed: false,
            replacements: Vec::new(),
        }
    }

    async fn persist(&mut self) {
        let flags = self.flags();
        self.saved.audio_on = flags.audio_on;
        // The display track's state is not a camera preference.
        if self.mode == CaptureMode::Camera {
            self.saved.video_on = flags.video_on;
        }
        if let Err(e) = self.preferences.save(self.saved).await {
            warn!(target: "ls.media", error = %e, "Could not persist media preferences");
        }
    }
}

//! Recording state machine and chunk buffering.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use common::types::CourseId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{select_mime_type, EncoderSession, MediaEncoder, RecordingArtifact, RecordingStatus, PREFERRED_MIME_TYPES};
use crate::errors::{DeviceError, SessionError};
use crate::media::{MediaDevices, MediaStream, MediaTrack};

struct ActiveRecording {
    session: Box<dyn EncoderSession>,
    chunks: mpsc::UnboundedReceiver<Bytes>,
    mime_type: &'static str,
    /// Tracks captured only for this recording
    owned_tracks: Vec<Arc<MediaTrack>>,
    started_at: DateTime<Utc>,
}

/// One recording at a time, started and stopped by the local participant.
pub struct RecordingPipeline {
    devices: Arc<dyn MediaDevices>,
    encoder: Arc<dyn MediaEncoder>,
    course_id: Option<CourseId>,
    status: RecordingStatus,
    active: Option<ActiveRecording>,
}

impl RecordingPipeline {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        encoder: Arc<dyn MediaEncoder>,
        course_id: Option<CourseId>,
    ) -> Self {
        Self {
            devices,
            encoder,
            course_id,
            status: RecordingStatus::Idle,
            active: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.status == RecordingStatus::Recording
    }

    /// Start recording.
    ///
    /// While screen sharing, a fresh display capture with system audio is
    /// recorded, mixed with the microphone. Otherwise the local stream is
    /// recorded as is. Returns the chosen encoding.
    ///
    /// # Errors
    ///
    /// `EncoderUnsupported` when no preferred encoding is available, a
    /// device error when the display capture is refused, and `Recording`
    /// when there is nothing to record or one is already running. The
    /// pipeline stays idle in every case.
    pub async fn start(
        &mut self,
        local_stream: Option<&MediaStream>,
        screen_sharing: bool,
    ) -> Result<&'static str, SessionError> {
        if self.status != RecordingStatus::Idle {
            return Err(SessionError::Recording("a recording is already running".to_string()));
        }

        let Some(mime_type) = select_mime_type(self.encoder.as_ref()) else {
            warn!(target: "ls.recording", "No supported recording encoding");
            return Err(SessionError::EncoderUnsupported {
                tried: PREFERRED_MIME_TYPES.iter().map(ToString::to_string).collect(),
            });
        };

        let (stream, owned_tracks) = if screen_sharing {
            self.capture_screen(local_stream).await?
        } else {
            let stream = local_stream
                .cloned()
                .ok_or_else(|| SessionError::Recording("no camera or microphone stream to record".to_string()))?;
            (stream, Vec::new())
        };

        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        let session = match self.encoder.start(stream, mime_type, chunks_tx).await {
            Ok(session) => session,
            Err(e) => {
                for track in &owned_tracks {
                    track.stop();
                }
                warn!(target: "ls.recording", error = %e, "Encoder failed to start");
                return Err(e);
            }
        };

        self.active = Some(ActiveRecording {
            session,
            chunks: chunks_rx,
            mime_type,
            owned_tracks,
            started_at: Utc::now(),
        });
        self.status = RecordingStatus::Recording;

        info!(
            target: "ls.recording",
            mime_type,
            source = if screen_sharing { "screen" } else { "camera" },
            "Recording started"
        );
        Ok(mime_type)
    }

    async fn capture_screen(
        &self,
        local_stream: Option<&MediaStream>,
    ) -> Result<(MediaStream, Vec<Arc<MediaTrack>>), SessionError> {
        let display = self.devices.get_display_media(true).await.map_err(|e| {
            if e == DeviceError::Cancelled {
                info!(target: "ls.recording", "Display capture for recording cancelled");
            } else {
                warn!(target: "ls.recording", error = %e, "Display capture for recording failed");
            }
            SessionError::Device(e)
        })?;
        let mut owned: Vec<_> = display.tracks().to_vec();

        let Some(local) = local_stream else {
            return Ok((display, owned));
        };
        let Some(video) = display.video_track().cloned() else {
            return Ok((display, owned));
        };

        let mut sources: Vec<_> = display.audio_tracks().cloned().collect();
        if let Some(mic) = local.audio_track() {
            sources.push(Arc::clone(mic));
        }
        if sources.is_empty() {
            return Ok((MediaStream::new(vec![video]), owned));
        }

        match self.devices.mix_audio(sources).await {
            Ok(mixed) => {
                owned.push(Arc::clone(&mixed));
                Ok((MediaStream::new(vec![video, mixed]), owned))
            }
            Err(e) => {
                warn!(target: "ls.recording", error = %e, "Audio mixing failed, recording display audio only");
                Ok((display, owned))
            }
        }
    }

    /// Stop recording and assemble the artifact.
    ///
    /// # Errors
    ///
    /// `Recording` when nothing is recording or no data was captured. The
    /// pipeline is idle afterwards either way.
    pub async fn stop(&mut self) -> Result<RecordingArtifact, SessionError> {
        let Some(active) = self.active.take() else {
            return Err(SessionError::Recording("no recording is running".to_string()));
        };
        self.status = RecordingStatus::Finalizing;
        debug!(target: "ls.recording", "Finalizing recording");

        let ActiveRecording {
            session,
            mut chunks,
            mime_type,
            owned_tracks,
            started_at,
        } = active;

        let stopped = session.stop().await;

        let mut data = BytesMut::new();
        let mut chunk_count = 0usize;
        while let Ok(chunk) = chunks.try_recv() {
            if !chunk.is_empty() {
                data.extend_from_slice(&chunk);
                chunk_count += 1;
            }
        }

        for track in &owned_tracks {
            track.stop();
        }
        self.status = RecordingStatus::Idle;

        if let Err(e) = stopped {
            warn!(target: "ls.recording", error = %e, "Encoder reported an error while stopping");
        }
        if data.is_empty() {
            warn!(target: "ls.recording", "Recording produced no data");
            return Err(SessionError::Recording("no data was captured".to_string()));
        }

        let artifact = RecordingArtifact::new(data.freeze(), mime_type, self.course_id.clone(), started_at);
        info!(
            target: "ls.recording",
            chunks = chunk_count,
            bytes = artifact.len(),
            file_name = %artifact.file_name,
            "Recording finalized"
        );
        Ok(artifact)
    }
}

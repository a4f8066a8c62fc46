//! Capture devices and encoder stand-ins.

use async_trait::async_trait;
use bytes::Bytes;
use session_core::errors::{DeviceError, SessionError};
use session_core::media::{CaptureConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind, TrackSource};
use session_core::recording::{EncoderSession, MediaEncoder};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct DeviceState {
    user_media_error: Option<DeviceError>,
    display_results: VecDeque<Result<(), DeviceError>>,
    display_audio: bool,
    user_media_requests: Vec<CaptureConstraints>,
    display_requests: Vec<bool>,
    display_streams: Vec<MediaStream>,
    user_streams: Vec<MediaStream>,
    mixes: Vec<Vec<String>>,
}

/// Capture devices that hand out fresh tracks on every request.
#[derive(Debug, Default)]
pub struct MockMediaDevices {
    state: Mutex<DeviceState>,
}

impl MockMediaDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> MockMediaDevicesBuilder {
        MockMediaDevicesBuilder::default()
    }

    /// Make the next display capture fail with `error`.
    pub fn fail_next_display(&self, error: DeviceError) {
        self.state
            .lock()
            .unwrap()
            .display_results
            .push_back(Err(error));
    }

    /// Constraints of every camera/microphone request.
    #[must_use]
    pub fn user_media_requests(&self) -> Vec<CaptureConstraints> {
        self.state.lock().unwrap().user_media_requests.clone()
    }

    /// `with_audio` of every display request.
    #[must_use]
    pub fn display_requests(&self) -> Vec<bool> {
        self.state.lock().unwrap().display_requests.clone()
    }

    /// Display streams handed out so far.
    #[must_use]
    pub fn display_streams(&self) -> Vec<MediaStream> {
        self.state.lock().unwrap().display_streams.clone()
    }

    /// Camera/microphone streams handed out so far.
    #[must_use]
    pub fn user_streams(&self) -> Vec<MediaStream> {
        self.state.lock().unwrap().user_streams.clone()
    }

    /// Track ids of every mix request.
    #[must_use]
    pub fn mixes(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().mixes.clone()
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn get_user_media(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<MediaStream, DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.user_media_requests.push(constraints);
        if let Some(error) = state.user_media_error.clone() {
            return Err(error);
        }

        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, TrackSource::Camera));
        }
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, TrackSource::Microphone));
        }
        let stream = MediaStream::new(tracks);
        state.user_streams.push(stream.clone());
        Ok(stream)
    }

    async fn get_display_media(&self, with_audio: bool) -> Result<MediaStream, DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.display_requests.push(with_audio);
        if let Some(Err(error)) = state.display_results.pop_front() {
            return Err(error);
        }

        let mut tracks = vec![MediaTrack::new(TrackKind::Video, TrackSource::Display)];
        if with_audio && state.display_audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, TrackSource::SystemAudio));
        }
        let stream = MediaStream::new(tracks);
        state.display_streams.push(stream.clone());
        Ok(stream)
    }

    async fn mix_audio(&self, sources: Vec<Arc<MediaTrack>>) -> Result<Arc<MediaTrack>, DeviceError> {
        self.state
            .lock()
            .unwrap()
            .mixes
            .push(sources.iter().map(|t| t.id().to_string()).collect());
        Ok(MediaTrack::new(TrackKind::Audio, TrackSource::Mixed))
    }
}

/// Builder for [`MockMediaDevices`].
#[derive(Debug, Default)]
pub struct MockMediaDevicesBuilder {
    user_media_error: Option<DeviceError>,
    display_audio: bool,
}

impl MockMediaDevicesBuilder {
    /// Camera/microphone requests fail with `error`.
    #[must_use]
    pub fn deny_user_media(mut self, error: DeviceError) -> Self {
        self.user_media_error = Some(error);
        self
    }

    /// Display captures include a system audio track when asked for one.
    #[must_use]
    pub fn with_display_audio(mut self) -> Self {
        self.display_audio = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MockMediaDevices {
        MockMediaDevices {
            state: Mutex::new(DeviceState {
                user_media_error: self.user_media_error,
                display_audio: self.display_audio,
                ..DeviceState::default()
            }),
        }
    }
}

#[derive(Debug, Default)]
struct EncoderState {
    supported: Option<Vec<String>>,
    chunks: Vec<Bytes>,
    started: Vec<(String, Vec<String>)>,
    stopped: usize,
}

/// Encoder that emits a fixed list of chunks when started.
#[derive(Debug, Default)]
pub struct MockEncoder {
    state: Arc<Mutex<EncoderState>>,
}

impl MockEncoder {
    /// Supports every encoding and emits one small chunk.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunks(vec![Bytes::from_static(b"chunk")])
    }

    #[must_use]
    pub fn with_chunks(chunks: Vec<Bytes>) -> Self {
        Self {
            state: Arc::new(Mutex::new(EncoderState {
                chunks,
                ..EncoderState::default()
            })),
        }
    }

    /// Only these encodings are supported.
    #[must_use]
    pub fn supporting(self, mime_types: &[&str]) -> Self {
        self.state.lock().unwrap().supported =
            Some(mime_types.iter().map(ToString::to_string).collect());
        self
    }

    /// `(mime type, track ids)` of every started encode.
    #[must_use]
    pub fn started(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().started.clone()
    }

    #[must_use]
    pub fn stopped(&self) -> usize {
        self.state.lock().unwrap().stopped
    }
}

#[async_trait]
impl MediaEncoder for MockEncoder {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        match &self.state.lock().unwrap().supported {
            Some(supported) => supported.iter().any(|m| m == mime_type),
            None => true,
        }
    }

    async fn start(
        &self,
        stream: MediaStream,
        mime_type: &str,
        chunks: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn EncoderSession>, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.started.push((
            mime_type.to_string(),
            stream.tracks().iter().map(|t| t.id().to_string()).collect(),
        ));
        for chunk in &state.chunks {
            let _ = chunks.send(chunk.clone());
        }
        Ok(Box::new(MockEncoderSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockEncoderSession {
    state: Arc<Mutex<EncoderState>>,
}

#[async_trait]
impl EncoderSession for MockEncoderSession {
    async fn stop(self: Box<Self>) -> Result<(), SessionError> {
        self.state.lock().unwrap().stopped += 1;
        Ok(())
    }
}

//! Codec for encoding and decoding relay text frames.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Largest frame accepted in either direction.
///
/// Whiteboard images travel inline as data URLs, so this is generous.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame exceeds [`MAX_FRAME_BYTES`]
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame is not a valid event for this direction
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Message could not be serialized
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Encode a message into a text frame
///
/// # Errors
///
/// Returns an error if serialization fails or the result exceeds
/// [`MAX_FRAME_BYTES`]
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    check_size(text.len())?;
    Ok(text)
}

/// Decode a text frame into a message
///
/// # Errors
///
/// Returns an error if the frame is oversized or does not parse as `T`
pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, ProtocolError> {
    check_size(frame.len())?;
    serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn check_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(())
}

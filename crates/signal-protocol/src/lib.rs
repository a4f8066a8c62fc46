//! Signaling relay protocol for live sessions.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}`. Outbound events are modeled by
//! [`ClientMessage`], inbound ones by [`ServerMessage`].

pub mod codec;
pub mod envelope;
pub mod messages;
pub mod whiteboard;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_BYTES};
pub use envelope::{IceCandidate, SignalEnvelope, SignalKind, SignalPayload};
pub use messages::{
    AdminAction, AdminActionRequest, AdminCommand, ClientMessage, Connected, HandRaisedChange,
    HandRaisedChanged, JoinSession, ParticipantAnnouncement, RelayError, ServerMessage,
    SessionInfo, SessionRef, StartTime, StreamStateChange, StreamStateChanged, UserLeft,
    WhiteboardBroadcast, WhiteboardDraw,
};
pub use whiteboard::{CircleGeometry, ImageOp, Segment, ShapeOp, StrokePoint, StrokeTool, TextOp, WhiteboardOp};

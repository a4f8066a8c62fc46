//! Live-session coordination core.
//!
//! Establishes and repairs a multi-party peer-to-peer media session:
//!
//! - [`signaling`]: channel to the relay service
//! - [`mesh`]: one peer connection per remote participant, with a
//!   deterministic initiator tie-break
//! - [`store`]: participant view consumed by the UI layer
//! - [`reconnect`]: bounded exponential backoff after channel loss
//! - [`media`]: local capture, toggles and screen-share track replacement
//! - [`recording`]: encoder probing, chunk buffering, upload with local fallback
//! - [`whiteboard`]: drawing-operation pass-through
//!
//! [`runtime::SessionRuntime`] ties these together as a single actor that owns
//! all mutable session state and processes every inbound event from one queue.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod media;
pub mod mesh;
pub mod observability;
pub mod reconnect;
pub mod recording;
pub mod runtime;
pub mod signaling;
pub mod store;
pub mod whiteboard;

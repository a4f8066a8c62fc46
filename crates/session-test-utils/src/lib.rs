//! # Session Test Utilities
//!
//! Mocks and fixtures for exercising the live-session runtime without a
//! relay, capture devices or an upload service.
//!
//! ## Modules
//!
//! - `mock_relay` - Routing relay implementing `SignalingConnector`
//! - `mock_peers` - Scripted peer connections with a call log
//! - `mock_media` - Capture devices and encoder
//! - `mock_delivery` - Recording upload and local save targets
//! - `fixtures` - Profiles, setups, environment wiring and wait helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let relay = MockRelay::new().with_connection_ids(["a1", "b2"]);
//!     let alice = MockEnvironment::new(relay.clone());
//!     let mut session = alice.spawn(setup("room", "alice", Role::Tutor));
//!     let local_id = session.connected().await;
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod mock_delivery;
pub mod mock_media;
pub mod mock_peers;
pub mod mock_relay;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_delivery::*;
pub use mock_media::*;
pub use mock_peers::*;
pub use mock_relay::*;

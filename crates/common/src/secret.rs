//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] so every crate in the workspace wraps credentials the
//! same way. The recording upload bearer token is the main consumer: any struct
//! holding it can derive `Debug` and still never print the token.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct UploadTarget {
//!     url: String,
//!     token: SecretString,
//! }
//!
//! let target = UploadTarget {
//!     url: "http://localhost:3000/api/upload/material".to_string(),
//!     token: SecretString::from("bearer-value"),
//! };
//!
//! assert!(!format!("{target:?}").contains("bearer-value"));
//! assert_eq!(target.token.expose_secret(), "bearer-value");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

//! Clipcast-Common: Shared types, IDs, and errors.
//!
//! This crate provides functionality used across clipcast:
//!
//! - **Typed IDs**: newtypes for streams, catalog items and tracks
//! - **Core Types**: stream definitions, playlist items, encoding modes
//! - **Error Handling**: the error taxonomy shared by the HLS engine and the
//!   HTTP gateway, with an HTTP status mapping
//!
//! # Examples
//!
//! ```
//! use clipcast_common::{EncodingMode, Error, Result, StreamId};
//!
//! let id: StreamId = "42".parse().unwrap();
//! assert_eq!(id.get(), 42);
//!
//! assert!(EncodingMode::Copy.needs_compatible_source());
//!
//! let example = || -> Result<()> {
//!     Err(Error::not_found("stream", id))
//! };
//! assert_eq!(example().unwrap_err().http_status(), 404);
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;

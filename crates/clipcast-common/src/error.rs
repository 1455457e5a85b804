//! Unified error type for the streaming core.
//!
//! Every failure in the HLS engine is funnelled into [`Error`], which carries
//! enough context for the HTTP gateway to derive a status code via
//! [`Error::http_status`].

use std::fmt;

/// Error taxonomy of the streaming core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown stream, track or item.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "stream", "track").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Malformed ids or segment names. No subprocess work is performed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The action is not allowed in the resource's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller presented no token or a wrong one.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Output is not produced yet; the caller should retry.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// A track has no usable HLS cache; an encode job was or should be queued.
    #[error("HLS cache missing for track {track_id}")]
    CacheMiss {
        /// The track without a cache entry.
        track_id: String,
    },

    /// Probing a source file failed or timed out.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The encoder exited with an error or kept crashing.
    #[error("Encode error: {0}")]
    Encode(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::InvalidRequest(_) => 400,
            Error::Conflict(_) => 409,
            Error::Unauthorized(_) => 401,
            Error::NotReady(_) => 503,
            Error::CacheMiss { .. } => 503,
            Error::Probe(_) => 422,
            Error::Encode(_) => 502,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether the client may simply retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NotReady(_) | Error::CacheMiss { .. })
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::CacheMiss`].
    pub fn cache_miss(track_id: impl fmt::Display) -> Self {
        Error::CacheMiss {
            track_id: track_id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidRequest`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

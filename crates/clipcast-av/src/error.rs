//! Error types for clipcast-av.

use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving external media tools.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// An external tool failed to execute or exited non-zero.
    #[error("tool execution failed: {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    /// An external tool did not finish in time and was killed.
    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    /// Failed to parse tool output.
    #[error("failed to parse {tool} output: {message}")]
    ParseError { tool: String, message: String },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation is not supported on this platform.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a tool execution failed error.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from reading tool output rather than running it.
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::ParseError { .. } | Error::Json(_)
        )
    }
}

impl From<Error> for clipcast_common::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(source) => clipcast_common::Error::Io { source },
            Error::InvalidInput(msg) => clipcast_common::Error::InvalidRequest(msg),
            e if e.is_probe_failure() => clipcast_common::Error::Probe(e.to_string()),
            e @ (Error::ToolNotFound { .. } | Error::ToolFailed { .. }) => {
                clipcast_common::Error::Encode(e.to_string())
            }
            e => clipcast_common::Error::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_to_common() {
        let timeout = Error::Timeout {
            tool: "ffprobe".into(),
            after: Duration::from_secs(3),
        };
        assert_eq!(clipcast_common::Error::from(timeout).http_status(), 422);

        let failed = Error::tool_failed("ffmpeg", "exit status 1");
        assert_eq!(clipcast_common::Error::from(failed).http_status(), 502);

        let invalid = Error::InvalidInput("empty playlist".into());
        assert_eq!(clipcast_common::Error::from(invalid).http_status(), 400);
    }
}

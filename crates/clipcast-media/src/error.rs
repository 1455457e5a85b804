//! Error types for clipcast-media.

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading HLS playlists.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The text does not start with `#EXTM3U`.
    #[error("not an M3U8 playlist")]
    MissingHeader,

    /// A tag value could not be parsed.
    #[error("invalid {tag} value on line {line}: {value}")]
    InvalidTag {
        tag: &'static str,
        line: usize,
        value: String,
    },

    /// An `#EXTINF` was not followed by a segment URI.
    #[error("segment on line {0} has no URI")]
    DanglingSegment(usize),
}

//! HLS playlist handling.

mod parse;
mod playlist;

pub use parse::{parse_media_playlist, rewrite_uris, ParsedPlaylist, ParsedSegment};
pub use playlist::{MediaPlaylist, PlaylistType, SegmentEntry};

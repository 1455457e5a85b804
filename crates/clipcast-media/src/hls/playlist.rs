//! HLS media playlist structures.

use std::fmt::Write;

/// Media playlist for a single rendition.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    /// Target duration in seconds.
    pub target_duration: u32,
    /// Media sequence number of the first segment.
    pub media_sequence: u64,
    /// Discontinuity sequence number of the first segment.
    pub discontinuity_sequence: u64,
    /// Playlist type (VOD, EVENT or sliding live window).
    pub playlist_type: PlaylistType,
    /// Segment entries.
    pub segments: Vec<SegmentEntry>,
    /// Whether this is an ended playlist.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Create a new VOD playlist.
    pub fn vod() -> Self {
        Self {
            target_duration: 6,
            media_sequence: 0,
            discontinuity_sequence: 0,
            playlist_type: PlaylistType::Vod,
            segments: Vec::new(),
            ended: true,
        }
    }

    /// Create a new sliding-window live playlist.
    pub fn live(media_sequence: u64, discontinuity_sequence: u64) -> Self {
        Self {
            target_duration: 6,
            media_sequence,
            discontinuity_sequence,
            playlist_type: PlaylistType::Live,
            segments: Vec::new(),
            ended: false,
        }
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:7").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();
        if self.discontinuity_sequence > 0 || self.playlist_type == PlaylistType::Live {
            writeln!(
                out,
                "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
                self.discontinuity_sequence
            )
            .unwrap();
        }

        match self.playlist_type {
            PlaylistType::Vod => writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap(),
            PlaylistType::Event => writeln!(out, "#EXT-X-PLAYLIST-TYPE:EVENT").unwrap(),
            PlaylistType::Live => {}
        }

        writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();

        for segment in &self.segments {
            if segment.discontinuity {
                writeln!(out, "#EXT-X-DISCONTINUITY").unwrap();
            }
            if let Some(ref map_uri) = segment.map_uri {
                writeln!(out, "#EXT-X-MAP:URI=\"{}\"", map_uri).unwrap();
            }
            if let Some(ref title) = segment.title {
                writeln!(out, "#EXTINF:{:.6},{}", segment.duration, title).unwrap();
            } else {
                writeln!(out, "#EXTINF:{:.6},", segment.duration).unwrap();
            }
            writeln!(out, "{}", segment.uri).unwrap();
        }

        if self.ended {
            writeln!(out, "#EXT-X-ENDLIST").unwrap();
        }

        out
    }
}

/// Playlist type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
    Live,
}

/// A segment entry in the playlist.
#[derive(Debug, Clone, Default)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI.
    pub uri: String,
    /// Optional title.
    pub title: Option<String>,
    /// Discontinuity before this segment.
    pub discontinuity: bool,
    /// Initialization section that applies from this segment on.
    pub map_uri: Option<String>,
}

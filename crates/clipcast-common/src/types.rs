//! Core domain types shared by the catalog, the HLS engine and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::{ItemId, StreamId, TrackId};

/// Whether a stream is currently broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    #[default]
    Stopped,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStatus::Active => write!(f, "active"),
            StreamStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// How source files are turned into stream output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Serve source bytes unchanged (direct play). In HLS paths this behaves
    /// like [`EncodingMode::Copy`].
    Original,
    /// Remux without re-encoding.
    Copy,
    /// Re-encode with the configured transcode profile.
    Transcode,
    /// Re-encode with the baseline browser-compatible profile.
    #[default]
    Web,
}

impl EncodingMode {
    /// Modes that pass source streams through and therefore require sources
    /// already matching the baseline codecs.
    pub fn needs_compatible_source(self) -> bool {
        matches!(self, EncodingMode::Original | EncodingMode::Copy)
    }

    /// Whether this mode re-encodes video and audio.
    pub fn is_transcode(self) -> bool {
        matches!(self, EncodingMode::Transcode | EncodingMode::Web)
    }
}

impl std::fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingMode::Original => write!(f, "original"),
            EncodingMode::Copy => write!(f, "copy"),
            EncodingMode::Transcode => write!(f, "transcode"),
            EncodingMode::Web => write!(f, "web"),
        }
    }
}

impl std::str::FromStr for EncodingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "original" | "direct" => Ok(Self::Original),
            "copy" | "remux" => Ok(Self::Copy),
            "transcode" => Ok(Self::Transcode),
            "web" => Ok(Self::Web),
            _ => Err(format!("Unknown encoding mode: {}", s)),
        }
    }
}

/// One playable unit in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Position in the stream's source order.
    pub position: u32,
    /// Catalog entry id (unique within the stream).
    pub item_id: ItemId,
    /// Library track backing this item.
    pub track_id: TrackId,
    /// Absolute path to the source media file.
    pub file_path: PathBuf,
    /// Artist display name, used for fairness shuffling.
    #[serde(default)]
    pub artist: Option<String>,
    /// Whether the file has been downloaded and is playable.
    #[serde(default = "default_available")]
    pub available: bool,
    /// Known duration in seconds, if the catalog has probed it.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

fn default_available() -> bool {
    true
}

impl PlaylistItem {
    /// Bucket key used to keep the same artist from playing back to back.
    ///
    /// Items without an artist get a key unique to their track so they never
    /// constrain the shuffle.
    pub fn artist_key(&self) -> String {
        match self.artist.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_lowercase(),
            _ => format!("\u{0}track-{}", self.track_id),
        }
    }
}

/// A configured virtual channel, as supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDefinition {
    pub id: StreamId,
    pub name: String,
    #[serde(default)]
    pub status: StreamStatus,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub encoding: EncodingMode,
    /// Anchor for "what is playing now"; set when the stream was activated.
    #[serde(default)]
    pub online_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

impl StreamDefinition {
    pub fn is_active(&self) -> bool {
        self.status == StreamStatus::Active
    }

    /// Items that can actually be played, in source order.
    pub fn available_items(&self) -> Vec<PlaylistItem> {
        let mut items: Vec<PlaylistItem> =
            self.items.iter().filter(|i| i.available).cloned().collect();
        items.sort_by_key(|i| i.position);
        items
    }

    /// Shuffle seed: the online-since anchor at second granularity.
    pub fn shuffle_seed(&self) -> u64 {
        self.online_since
            .map(|t| t.timestamp() as u64)
            .unwrap_or(0)
    }

    /// Seconds elapsed since the stream went online, or `None` when the
    /// stream is not broadcasting.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<f64> {
        if !self.is_active() {
            return None;
        }
        let since = self.online_since?;
        let millis = (now - since).num_milliseconds().max(0);
        Some(millis as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(position: u32, artist: Option<&str>, available: bool) -> PlaylistItem {
        PlaylistItem {
            position,
            item_id: ItemId::new(position as i64),
            track_id: TrackId::new(100 + position as i64),
            file_path: PathBuf::from(format!("/media/{}.mp4", position)),
            artist: artist.map(String::from),
            available,
            duration_secs: None,
        }
    }

    #[test]
    fn test_encoding_mode_parse() {
        assert_eq!("COPY".parse::<EncodingMode>().unwrap(), EncodingMode::Copy);
        assert_eq!("web".parse::<EncodingMode>().unwrap(), EncodingMode::Web);
        assert!("hevc".parse::<EncodingMode>().is_err());
    }

    #[test]
    fn test_artist_key_normalizes_case() {
        assert_eq!(item(0, Some(" Daft Punk "), true).artist_key(), "daft punk");
        assert_ne!(item(0, None, true).artist_key(), item(1, None, true).artist_key());
    }

    #[test]
    fn test_available_items_sorted_and_filtered() {
        let stream = StreamDefinition {
            id: StreamId::new(1),
            name: "test".into(),
            status: StreamStatus::Active,
            shuffle: false,
            encoding: EncodingMode::Copy,
            online_since: None,
            items: vec![item(2, None, true), item(0, None, true), item(1, None, false)],
        };
        let positions: Vec<u32> = stream.available_items().iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn test_elapsed_requires_active_stream() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut stream = StreamDefinition {
            id: StreamId::new(1),
            name: "test".into(),
            status: StreamStatus::Stopped,
            shuffle: false,
            encoding: EncodingMode::Copy,
            online_since: Some(since),
            items: Vec::new(),
        };
        let now = since + chrono::Duration::seconds(90);
        assert_eq!(stream.elapsed_secs(now), None);

        stream.status = StreamStatus::Active;
        assert_eq!(stream.elapsed_secs(now), Some(90.0));
        assert_eq!(stream.shuffle_seed(), since.timestamp() as u64);
    }
}

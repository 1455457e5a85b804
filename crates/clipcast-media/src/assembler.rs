//! Stitching per-track HLS caches into one radio playlist.
//!
//! Each track is encoded once into its own VOD playlist. The assembler
//! flattens those playlists in playback order and either emits the whole list
//! (finite VOD) or a sliding window over an endless loop anchored at the time
//! the stream went online.

use crate::hls::{MediaPlaylist, ParsedPlaylist, PlaylistType, SegmentEntry};
use crate::looping::{loop_window, LoopWindow};
use clipcast_common::TrackId;
use serde::{Deserialize, Serialize};

/// One segment of a track cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSegment {
    pub duration: f64,
    /// File name inside the track cache directory.
    pub file: String,
}

/// Parsed contents of a complete track cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackHlsEntry {
    pub target_duration: u32,
    /// Initialization section file name (fMP4 caches only).
    pub init: Option<String>,
    pub segments: Vec<CachedSegment>,
}

impl TrackHlsEntry {
    /// Build an entry from a finished encoder playlist.
    ///
    /// Returns `None` for playlists that are still being written (no
    /// `#EXT-X-ENDLIST`) or have no segments.
    pub fn from_playlist(playlist: &ParsedPlaylist) -> Option<Self> {
        if !playlist.ended || playlist.segments.is_empty() {
            return None;
        }

        let longest = playlist
            .segments
            .iter()
            .map(|s| s.duration.ceil() as u32)
            .max()
            .unwrap_or(0);

        Some(Self {
            target_duration: playlist.target_duration.unwrap_or(0).max(longest),
            init: playlist.map_uri.clone(),
            segments: playlist
                .segments
                .iter()
                .map(|s| CachedSegment {
                    duration: s.duration,
                    file: s.uri.clone(),
                })
                .collect(),
        })
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// A track in playback order together with its cache, if any.
#[derive(Debug, Clone)]
pub struct CachedTrack {
    pub track_id: TrackId,
    pub entry: Option<TrackHlsEntry>,
}

/// Cache-busting query parameter policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBust {
    Off,
    /// `v=<global sequence>` on segments, `v=<loop>-<track ordinal>` on init maps.
    #[default]
    Sequence,
}

impl std::str::FromStr for CacheBust {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "sequence" => Ok(Self::Sequence),
            _ => Err(format!("Unknown cache bust policy: {}", s)),
        }
    }
}

/// URL and windowing options.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Absolute base URL, e.g. `https://radio.example`.
    pub base_url: String,
    /// Access token appended to every URL.
    pub token: Option<String>,
    /// Live window length in seconds.
    pub window_secs: f64,
    pub cache_bust: CacheBust,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            window_secs: 1800.0,
            cache_bust: CacheBust::Sequence,
        }
    }
}

/// A rendered playlist.
#[derive(Debug, Clone)]
pub struct AssembledPlaylist {
    pub body: String,
    /// Every track had a cache.
    pub complete: bool,
    /// Tracks without a cache, to be queued for encoding.
    pub missing: Vec<TrackId>,
    /// Window position for live playlists.
    pub window: Option<LoopWindow>,
    pub segment_count: usize,
}

/// Outcome of an assembly attempt.
#[derive(Debug, Clone)]
pub enum Assembly {
    /// Nothing is cached yet.
    NotReady { missing: Vec<TrackId> },
    Ready(AssembledPlaylist),
}

struct FlatSegment<'a> {
    track_id: TrackId,
    ordinal: usize,
    duration: f64,
    file: &'a str,
    init: Option<&'a str>,
}

/// Assemble a playlist from cached tracks.
///
/// With `elapsed_secs` the result is a live sliding window over the looping
/// list; without it, a finite playlist of everything cached.
pub fn assemble(tracks: &[CachedTrack], elapsed_secs: Option<f64>, opts: &AssembleOptions) -> Assembly {
    let missing: Vec<TrackId> = tracks
        .iter()
        .filter(|t| t.entry.is_none())
        .map(|t| t.track_id)
        .collect();

    let mut flat = Vec::new();
    let mut track_starts = Vec::new();
    let mut target_duration = 1u32;

    for (ordinal, track) in tracks.iter().enumerate() {
        let Some(entry) = &track.entry else {
            continue;
        };
        target_duration = target_duration.max(entry.target_duration);
        for (i, segment) in entry.segments.iter().enumerate() {
            target_duration = target_duration.max(segment.duration.ceil() as u32);
            track_starts.push(i == 0);
            flat.push(FlatSegment {
                track_id: track.track_id,
                ordinal,
                duration: segment.duration,
                file: &segment.file,
                init: entry.init.as_deref(),
            });
        }
    }

    if flat.is_empty() {
        return Assembly::NotReady { missing };
    }

    let complete = missing.is_empty();

    let (mut playlist, range, window) = match elapsed_secs {
        Some(elapsed) => {
            let durations: Vec<f64> = flat.iter().map(|s| s.duration).collect();
            let Some(window) = loop_window(&durations, &track_starts, elapsed, opts.window_secs)
            else {
                return Assembly::NotReady { missing };
            };
            let playlist = MediaPlaylist::live(window.media_sequence, window.discontinuity_sequence);
            (playlist, window.start_index..=window.end_index, Some(window))
        }
        None => {
            let mut playlist = MediaPlaylist::vod();
            if !complete {
                playlist.playlist_type = PlaylistType::Event;
                playlist.ended = false;
            }
            (playlist, 0..=flat.len() - 1, None)
        }
    };
    playlist.target_duration = target_duration;

    let loop_index = window.map(|w| w.loop_index).unwrap_or(0);
    let base_sequence = loop_index * flat.len() as u64;
    let start = *range.start();

    for index in range {
        let segment = &flat[index];
        let first = index == start;
        let discontinuity = (index > 0 && track_starts[index])
            || (first && window.map(|w| w.wrap_discontinuity).unwrap_or(false));

        let map_uri = if first || track_starts[index] {
            segment.init.map(|init| {
                segment_url(
                    opts,
                    segment.track_id,
                    init,
                    &format!("{}-{}", loop_index, segment.ordinal),
                )
            })
        } else {
            None
        };

        let version = (base_sequence + index as u64).to_string();
        playlist.segments.push(SegmentEntry {
            duration: segment.duration,
            uri: segment_url(opts, segment.track_id, segment.file, &version),
            title: None,
            discontinuity,
            map_uri,
        });
    }

    let segment_count = playlist.segments.len();
    Assembly::Ready(AssembledPlaylist {
        body: playlist.render(),
        complete,
        missing,
        window,
        segment_count,
    })
}

fn segment_url(opts: &AssembleOptions, track_id: TrackId, file: &str, version: &str) -> String {
    let mut url = format!(
        "{}/tracks/{}/hls/{}",
        opts.base_url.trim_end_matches('/'),
        track_id,
        file
    );

    let mut query = Vec::new();
    if let Some(token) = opts.token.as_deref() {
        query.push(format!("token={}", encode_query_value(token)));
    }
    if opts.cache_bust == CacheBust::Sequence {
        query.push(format!("v={}", version));
    }
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

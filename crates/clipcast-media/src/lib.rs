//! # clipcast-media
//!
//! Pure (I/O free) building blocks of the clipcast HLS engine:
//!
//! - [`hls`] - media playlist rendering, parsing and URI rewriting
//! - [`planner`] - deterministic playback order and "now playing" lookup
//! - [`looping`] - sequence-number math for an infinitely looping playlist
//! - [`assembler`] - stitches per-track HLS caches into one radio playlist
//!
//! Everything here is a function of its inputs so the HTTP layer can compute
//! the same answer for every client without shared state.

pub mod assembler;
mod error;
pub mod hls;
pub mod looping;
pub mod planner;

pub use assembler::{
    assemble, AssembleOptions, AssembledPlaylist, Assembly, CacheBust, CachedSegment,
    CachedTrack, TrackHlsEntry,
};
pub use error::{Error, Result};
pub use hls::{parse_media_playlist, rewrite_uris, MediaPlaylist, ParsedPlaylist, PlaylistType};
pub use looping::{loop_window, LoopWindow};
pub use planner::{fairness_shuffle, now_playing, plan_items, plan_order, NowPlaying};

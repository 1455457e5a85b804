//! # clipcast-av
//!
//! External media tool plumbing for clipcast.
//!
//! This crate provides functionality for:
//! - Locating ffmpeg/ffprobe and running them with timeouts
//! - Probing codec names and durations
//! - Deciding whether sources can be stream-copied into HLS
//! - Building ffmpeg arguments for live, cached and progressive output
//! - Recognising and terminating orphaned encoder processes
//!
//! ## Features
//!
//! - `tracing` - Enable tracing support
//!
//! ## Example
//!
//! ```no_run
//! use clipcast_av::{concat_manifest, live_hls_args, LiveEncodeOptions, SegmentType};
//! use clipcast_common::EncodingMode;
//! use std::path::Path;
//!
//! let manifest = concat_manifest(&["/media/a.mp4", "/media/b.mp4"]);
//! let args = live_hls_args(
//!     Path::new("/tmp/clipcast-hls/stream-1"),
//!     &LiveEncodeOptions {
//!         mode: EncodingMode::Copy,
//!         profile: Default::default(),
//!         segment_secs: 6,
//!         list_size: 10,
//!         segment_type: SegmentType::Fmp4,
//!         start_number: 0,
//!     },
//! );
//! assert!(manifest.contains("file '/media/b.mp4'"));
//! assert!(args.iter().any(|a| a == "-re"));
//! ```

pub mod command;
pub mod compat;
pub mod encoder;
mod error;
pub mod probe;
pub mod process;
pub mod tools;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use compat::{check_codecs, CodecProber, CompatibilityResolver, FfprobeProber, Resolution};
pub use encoder::{
    codec_args, concat_manifest, live_hls_args, progressive_mp4_args, segment_index,
    vod_hls_args, LiveEncodeOptions, SegmentType, TranscodeProfile, CONCAT_FILENAME,
    INIT_FILENAME, PLAYLIST_FILENAME,
};
pub use error::{Error, Result};
pub use probe::{parse_ffprobe_json, probe_codecs, CodecInfo};
pub use process::{
    terminate_orphan, ProcessInspector, ProcessSignal, ProcessState, SystemProcessInspector,
};
pub use tools::{check_tool, check_tools, get_tool_path, require_tool, ToolInfo, ToolPaths};

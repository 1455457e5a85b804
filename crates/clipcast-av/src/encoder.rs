//! ffmpeg argument builders.
//!
//! Three kinds of encoder run against the library:
//! - a real-time live encoder reading a concat manifest and writing a rolling
//!   HLS window,
//! - a per-track VOD encode that fills a track's HLS cache,
//! - a single-file fragmented MP4 written to stdout for progressive playback.

use clipcast_common::EncodingMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Segment container for HLS output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    /// Fragmented MP4 with a shared `init.mp4`.
    #[default]
    Fmp4,
    /// MPEG transport stream.
    Mpegts,
}

impl SegmentType {
    pub fn extension(self) -> &'static str {
        match self {
            SegmentType::Fmp4 => "m4s",
            SegmentType::Mpegts => "ts",
        }
    }

    /// `-hls_segment_filename` pattern inside `dir`.
    pub fn segment_pattern(self, dir: &Path) -> PathBuf {
        dir.join(format!("segment-%06d.{}", self.extension()))
    }
}

impl std::str::FromStr for SegmentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fmp4" | "m4s" => Ok(Self::Fmp4),
            "mpegts" | "ts" => Ok(Self::Mpegts),
            _ => Err(format!("Unknown segment type: {}", s)),
        }
    }
}

/// H.264 settings for the `transcode` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub profile: String,
    pub level: String,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            profile: "main".to_string(),
            level: "4.0".to_string(),
        }
    }
}

/// Name of the init section written next to fMP4 segments.
pub const INIT_FILENAME: &str = "init.mp4";
/// Name of the media playlist written by HLS encoders.
pub const PLAYLIST_FILENAME: &str = "playlist.m3u8";
/// Name of the concat manifest inside a live session directory.
pub const CONCAT_FILENAME: &str = "concat.txt";

fn strings<const N: usize>(args: [&str; N]) -> impl Iterator<Item = String> + '_ {
    args.into_iter().map(str::to_string)
}

/// Video/audio codec arguments for `mode`.
///
/// `original` behaves like `copy` for encoder output.
pub fn codec_args(mode: EncodingMode, profile: &TranscodeProfile, segment_secs: u32) -> Vec<String> {
    let mut args = Vec::new();
    match mode {
        EncodingMode::Original | EncodingMode::Copy => {
            args.extend(strings(["-c:v", "copy", "-c:a", "copy"]));
        }
        EncodingMode::Transcode | EncodingMode::Web => {
            let (h264_profile, level) = match mode {
                EncodingMode::Transcode => (profile.profile.as_str(), profile.level.as_str()),
                _ => ("main", "4.0"),
            };
            args.extend(strings([
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-profile:v",
                h264_profile,
                "-level:v",
                level,
                "-pix_fmt",
                "yuv420p",
                "-sc_threshold",
                "0",
            ]));
            // Keyframe on every segment boundary.
            args.push("-force_key_frames".to_string());
            args.push(format!("expr:gte(t,n_forced*{})", segment_secs.max(1)));
            args.extend(strings([
                "-c:a", "aac", "-b:a", "160k", "-ac", "2", "-ar", "48000",
            ]));
        }
    }
    args
}

/// Options for the real-time live encoder.
#[derive(Debug, Clone)]
pub struct LiveEncodeOptions {
    pub mode: EncodingMode,
    pub profile: TranscodeProfile,
    pub segment_secs: u32,
    /// Segments kept in the rolling playlist.
    pub list_size: u32,
    pub segment_type: SegmentType,
    /// Index of the first segment this run writes.
    pub start_number: u64,
}

/// Arguments for a live encoder reading `<dir>/concat.txt` and writing
/// `<dir>/playlist.m3u8`.
pub fn live_hls_args(dir: &Path, opts: &LiveEncodeOptions) -> Vec<String> {
    let mut args: Vec<String> = strings([
        "-hide_banner",
        "-loglevel",
        "warning",
        "-nostdin",
        "-re",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
    ])
    .collect();
    args.push(dir.join(CONCAT_FILENAME).to_string_lossy().into_owned());
    args.extend(strings(["-map", "0:v:0?", "-map", "0:a:0?"]));
    args.extend(codec_args(opts.mode, &opts.profile, opts.segment_secs));

    let list_size = opts.list_size.max(1).to_string();
    args.extend(strings(["-f", "hls", "-hls_time"]));
    args.push(opts.segment_secs.max(1).to_string());
    args.push("-hls_list_size".to_string());
    args.push(list_size.clone());
    args.push("-hls_delete_threshold".to_string());
    args.push(list_size);
    args.extend(strings([
        "-hls_flags",
        "delete_segments+omit_endlist+append_list+discont_start+independent_segments",
        "-start_number",
    ]));
    args.push(opts.start_number.to_string());
    hls_output_args(&mut args, dir, opts.segment_type);
    args
}

/// Arguments for a one-shot VOD encode of `source` into `dir`.
pub fn vod_hls_args(
    source: &Path,
    dir: &Path,
    mode: EncodingMode,
    profile: &TranscodeProfile,
    segment_secs: u32,
    segment_type: SegmentType,
) -> Vec<String> {
    let mut args: Vec<String> = strings(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
        .collect();
    args.push(source.to_string_lossy().into_owned());
    args.extend(strings(["-map", "0:v:0?", "-map", "0:a:0?"]));
    args.extend(codec_args(mode, profile, segment_secs));
    args.extend(strings(["-f", "hls", "-hls_time"]));
    args.push(segment_secs.max(1).to_string());
    args.extend(strings([
        "-hls_playlist_type",
        "vod",
        "-hls_flags",
        "independent_segments",
        "-start_number",
        "0",
    ]));
    hls_output_args(&mut args, dir, segment_type);
    args
}

fn hls_output_args(args: &mut Vec<String>, dir: &Path, segment_type: SegmentType) {
    match segment_type {
        SegmentType::Fmp4 => {
            args.extend(strings([
                "-hls_segment_type",
                "fmp4",
                "-hls_fmp4_init_filename",
                INIT_FILENAME,
            ]));
        }
        SegmentType::Mpegts => {
            args.extend(strings(["-hls_segment_type", "mpegts"]));
        }
    }
    args.push("-hls_segment_filename".to_string());
    args.push(segment_type.segment_pattern(dir).to_string_lossy().into_owned());
    args.push(dir.join(PLAYLIST_FILENAME).to_string_lossy().into_owned());
}

/// Arguments for streaming `source` as fragmented MP4 on stdout.
pub fn progressive_mp4_args(
    source: &Path,
    mode: EncodingMode,
    profile: &TranscodeProfile,
    start_secs: Option<f64>,
) -> Vec<String> {
    let mut args: Vec<String> = strings(["-hide_banner", "-loglevel", "error", "-nostdin"]).collect();
    if let Some(start) = start_secs.filter(|s| *s > 0.0) {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", start));
    }
    args.push("-i".to_string());
    args.push(source.to_string_lossy().into_owned());
    args.extend(strings(["-map", "0:v:0?", "-map", "0:a:0?"]));
    args.extend(codec_args(mode, profile, 2));
    args.extend(strings([
        "-movflags",
        "frag_keyframe+empty_moov+default_base_moof",
        "-f",
        "mp4",
        "pipe:1",
    ]));
    args
}

/// Render a concat demuxer manifest listing `paths` in order.
pub fn concat_manifest<P: AsRef<Path>>(paths: &[P]) -> String {
    let mut out = String::from("ffconcat version 1.0\n");
    for path in paths {
        let escaped = path.as_ref().to_string_lossy().replace('\'', "'\\''");
        out.push_str("file '");
        out.push_str(&escaped);
        out.push_str("'\n");
    }
    out
}

/// Parse the index out of a `segment-XXXXXX.<ext>` file name.
pub fn segment_index(file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix("segment-")?;
    let (digits, ext) = rest.split_once('.')?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if ext != "m4s" && ext != "ts" {
        return None;
    }
    digits.parse().ok()
}

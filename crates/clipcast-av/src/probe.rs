//! FFprobe-based codec probing.

use crate::command::ToolCommand;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
}

/// The parts of a probe the streaming engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodecInfo {
    /// Codec of the first video stream.
    pub video_codec: Option<String>,
    /// Codec of the first audio stream.
    pub audio_codec: Option<String>,
    pub container: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Probe `path` with ffprobe, killing it after `timeout`.
pub async fn probe_codecs(ffprobe: &Path, path: &Path, timeout: Duration) -> Result<CodecInfo> {
    let output = ToolCommand::new(ffprobe.to_path_buf())
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path.to_string_lossy())
        .timeout(timeout)
        .execute()
        .await?;

    parse_ffprobe_json(&output.stdout)
}

/// Parse ffprobe's `-print_format json` output.
pub fn parse_ffprobe_json(json: &str) -> Result<CodecInfo> {
    if json.trim().is_empty() {
        return Err(Error::parse_error("ffprobe", "empty output"));
    }

    let output: FfprobeOutput = serde_json::from_str(json)?;

    let first_codec = |kind: &str| {
        output
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
            .and_then(|s| s.codec_name.clone())
    };

    let video_codec = first_codec("video");
    let audio_codec = first_codec("audio");

    let (container, duration_secs) = match &output.format {
        Some(format) => (
            format.format_name.clone(),
            format
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0),
        ),
        None => (None, None),
    };

    Ok(CodecInfo {
        video_codec,
        audio_codec,
        container,
        duration_secs,
    })
}

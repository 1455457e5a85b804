//! On-disk HLS output: file name validation, readiness polling and segment
//! index scanning.

use clipcast_common::{Error, Result};
use clipcast_media::{parse_media_playlist, ParsedPlaylist};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

/// Poll interval for files still being produced by an encoder.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(segment-\d{6}\.(m4s|ts)|init\.mp4|playlist\.m3u8)$")
            .expect("HLS file name pattern is valid")
    })
}

/// Whether `name` is a file an HLS encoder is allowed to produce.
pub fn is_valid_file_name(name: &str) -> bool {
    file_name_pattern().is_match(name)
}

/// Resolve `name` inside `dir`, rejecting anything but encoder output names.
pub fn resolve_segment(dir: &Path, name: &str) -> Result<PathBuf> {
    if !is_valid_file_name(name) {
        return Err(Error::invalid(format!("invalid HLS file name: {}", name)));
    }
    Ok(dir.join(name))
}

/// Content type by extension.
pub fn content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("m4s") | Some("mp4") => "video/mp4",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// Wait until `path` exists, up to `timeout`.
pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
    }
}

/// Read and parse `<dir>/playlist.m3u8`.
pub async fn read_playlist(dir: &Path) -> Option<ParsedPlaylist> {
    let text = tokio::fs::read_to_string(dir.join(clipcast_av::PLAYLIST_FILENAME))
        .await
        .ok()?;
    parse_media_playlist(&text).ok()
}

/// Check once whether the encoder output in `dir` is playable.
pub async fn is_ready(dir: &Path, min_segments: usize) -> bool {
    let Some(playlist) = read_playlist(dir).await else {
        return false;
    };
    if playlist.segments.len() < min_segments.max(1) {
        return false;
    }
    match playlist.map_uri.as_deref() {
        Some(init) => tokio::fs::try_exists(dir.join(init)).await.unwrap_or(false),
        None => true,
    }
}

/// Poll until the playlist in `dir` parses, lists at least `min_segments`
/// segments and its init section (if any) exists. Never errors on timeout.
pub async fn wait_ready(dir: &Path, timeout: Duration, min_segments: usize) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if is_ready(dir, min_segments).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
    }
}

/// Highest `segment-XXXXXX.*` index present in `dir`.
pub async fn highest_segment_index(dir: &Path) -> std::io::Result<Option<u64>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut highest = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(index) = clipcast_av::segment_index(&name.to_string_lossy()) {
            highest = highest.max(Some(index));
        }
    }
    Ok(highest)
}

/// Remove a directory tree; a missing directory is not an error.
pub async fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a file; a missing file is not an error.
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

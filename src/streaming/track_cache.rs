//! Per-track HLS caches stored beside the source media.
//!
//! Layout: `<source-dir>/.cache/track-<id>/{init.mp4, segment-NNNNNN.<ext>,
//! playlist.m3u8, source.json}`. Caches are produced by the encode queue into
//! a staging directory and published with a rename, so a reader either sees a
//! complete cache or none.

use clipcast_common::{Result, TrackId};
use clipcast_media::TrackHlsEntry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::files;

pub const CACHE_DIR_NAME: &str = ".cache";
pub const STAMP_FILENAME: &str = "source.json";

/// Cache directory of a track.
pub fn cache_dir(track_id: TrackId, source: &Path) -> PathBuf {
    source
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CACHE_DIR_NAME)
        .join(format!("track-{}", track_id))
}

/// Directory an encode job writes into before publishing.
pub fn staging_dir(track_id: TrackId, source: &Path) -> PathBuf {
    source
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CACHE_DIR_NAME)
        .join(format!("track-{}.partial", track_id))
}

/// Identity of the source file a cache was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_ms: Option<u128>,
}

impl SourceStamp {
    pub async fn of(source: &Path) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(source).await?;
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis());
        Ok(Self {
            size: meta.len(),
            modified_ms,
        })
    }

    pub async fn write(&self, dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(dir.join(STAMP_FILENAME), json).await
    }

    pub async fn read(dir: &Path) -> Option<Self> {
        let bytes = tokio::fs::read(dir.join(STAMP_FILENAME)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Read a complete cache, or `None`.
///
/// Anything short of a finished playlist whose referenced init section
/// exists is reported as absent. A cache whose stamp no longer matches the
/// source file is removed.
pub async fn read(track_id: TrackId, source: &Path) -> Option<TrackHlsEntry> {
    let dir = cache_dir(track_id, source);
    let playlist = files::read_playlist(&dir).await?;
    let mut entry = TrackHlsEntry::from_playlist(&playlist)?;
    for segment in &mut entry.segments {
        segment.file = file_name(&segment.file).to_string();
    }
    if let Some(init) = entry.init.as_mut() {
        *init = file_name(init).to_string();
    }

    if entry
        .segments
        .iter()
        .any(|s| !files::is_valid_file_name(&s.file))
    {
        tracing::warn!(track_id = %track_id, dir = %dir.display(), "Track cache lists unexpected files");
        return None;
    }

    if let Some(init) = &entry.init {
        if !files::is_valid_file_name(init)
            || !tokio::fs::try_exists(dir.join(init)).await.unwrap_or(false)
        {
            return None;
        }
    }

    if let Some(stamp) = SourceStamp::read(&dir).await {
        if let Ok(current) = SourceStamp::of(source).await {
            if current != stamp {
                tracing::info!(track_id = %track_id, "Source changed, invalidating track cache");
                if let Err(e) = invalidate(track_id, source).await {
                    tracing::warn!(track_id = %track_id, "Failed to invalidate track cache: {}", e);
                }
                return None;
            }
        }
    }

    Some(entry)
}

/// Last path component of a playlist URI.
pub(crate) fn file_name(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.rsplit('/').next().unwrap_or(path)
}

/// Remove a track's cache. A missing cache is not an error.
pub async fn invalidate(track_id: TrackId, source: &Path) -> std::io::Result<()> {
    files::remove_dir_if_exists(&cache_dir(track_id, source)).await
}

/// Stamp `staging` and move it into place, replacing any previous cache.
pub async fn publish(
    track_id: TrackId,
    source: &Path,
    staging: &Path,
    stamp: &SourceStamp,
) -> std::io::Result<PathBuf> {
    stamp.write(staging).await?;
    let target = cache_dir(track_id, source);
    files::remove_dir_if_exists(&target).await?;
    tokio::fs::rename(staging, &target).await?;
    Ok(target)
}

/// Path of a file inside a track's cache.
pub fn resolve_file(track_id: TrackId, source: &Path, name: &str) -> Result<PathBuf> {
    files::resolve_segment(&cache_dir(track_id, source), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE: &str = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:6.000,\nsegment-000000.m4s\n#EXTINF:4.500,\nsegment-000001.m4s\n#EXT-X-ENDLIST\n";

    fn source(dir: &Path) -> PathBuf {
        let path = dir.join("video.mp4");
        std::fs::write(&path, b"source bytes").unwrap();
        path
    }

    async fn publish_fixture(track: TrackId, src: &Path, playlist: &str, with_init: bool) {
        let staging = staging_dir(track, src);
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("playlist.m3u8"), playlist).unwrap();
        if with_init {
            std::fs::write(staging.join("init.mp4"), b"init").unwrap();
        }
        let stamp = SourceStamp::of(src).await.unwrap();
        publish(track, src, &staging, &stamp).await.unwrap();
    }

    #[test]
    fn test_layout() {
        let dir = cache_dir(TrackId::new(7), Path::new("/media/videos/a.mp4"));
        assert_eq!(dir, PathBuf::from("/media/videos/.cache/track-7"));
        assert!(resolve_file(TrackId::new(7), Path::new("/media/a.mp4"), "../a.mp4").is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("segment-000001.m4s"), "segment-000001.m4s");
        assert_eq!(file_name("/media/.cache/track-1/init.mp4"), "init.mp4");
        assert_eq!(file_name("segment-000002.ts?x=1"), "segment-000002.ts");
    }

    #[tokio::test]
    async fn test_read_complete_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source(tmp.path());
        let track = TrackId::new(1);

        assert!(read(track, &src).await.is_none());
        publish_fixture(track, &src, COMPLETE, true).await;

        let entry = read(track, &src).await.unwrap();
        assert_eq!(entry.init.as_deref(), Some("init.mp4"));
        assert_eq!(entry.segments.len(), 2);
        assert_eq!(entry.segments[1].file, "segment-000001.m4s");
        assert!((entry.total_duration() - 10.5).abs() < 1e-9);
        assert!(!staging_dir(track, &src).exists());
    }

    #[tokio::test]
    async fn test_missing_init_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source(tmp.path());
        publish_fixture(TrackId::new(2), &src, COMPLETE, false).await;
        assert!(read(TrackId::new(2), &src).await.is_none());
    }

    #[tokio::test]
    async fn test_unfinished_playlist_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source(tmp.path());
        let partial = COMPLETE.replace("#EXT-X-ENDLIST\n", "");
        publish_fixture(TrackId::new(3), &src, &partial, true).await;
        assert!(read(TrackId::new(3), &src).await.is_none());
    }

    #[tokio::test]
    async fn test_source_change_invalidates() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source(tmp.path());
        let track = TrackId::new(4);
        publish_fixture(track, &src, COMPLETE, true).await;
        assert!(read(track, &src).await.is_some());

        std::fs::write(&src, b"a different, longer source file").unwrap();
        assert!(read(track, &src).await.is_none());
        assert!(!cache_dir(track, &src).exists());
    }

    #[tokio::test]
    async fn test_invalidate_missing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source(tmp.path());
        invalidate(TrackId::new(5), &src).await.unwrap();
    }
}

//! Background encoding of per-track HLS caches.
//!
//! The cached radio playlist only references tracks that already have a
//! cache. Misses are pushed onto an [`EncodeQueue`]; the binary's
//! [`LocalEncodeQueue`] runs them one at a time in-process.

use async_trait::async_trait;
use clipcast_av::{
    vod_hls_args, CompatibilityResolver, SegmentType, ToolCommand, TranscodeProfile,
};
use clipcast_common::{EncodingMode, Error, Result, TrackId};
use clipcast_media::TrackHlsEntry;
use dashmap::DashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::streaming::files;
use crate::streaming::track_cache::{self, SourceStamp};

/// A request to build the HLS cache of one track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackEncodeRequest {
    pub track_id: TrackId,
    pub file_path: PathBuf,
    /// Encoding mode of the stream that asked for the track.
    pub requested: EncodingMode,
}

/// Accepts track encode requests.
pub trait EncodeQueue: Send + Sync {
    /// Queue a request. Returns `false` if the track is already pending or
    /// the queue is full.
    fn enqueue(&self, request: TrackEncodeRequest) -> bool;
}

/// Builds one track cache.
#[async_trait]
pub trait TrackEncoder: Send + Sync {
    /// Encode and publish the cache, returning its directory.
    async fn encode(&self, request: &TrackEncodeRequest) -> Result<PathBuf>;
}

/// ffmpeg-backed [`TrackEncoder`].
#[derive(Debug, Clone)]
pub struct FfmpegTrackEncoder {
    pub ffmpeg: PathBuf,
    pub resolver: CompatibilityResolver,
    pub profile: TranscodeProfile,
    pub segment_secs: u32,
    pub segment_type: SegmentType,
    pub timeout: Duration,
}

impl FfmpegTrackEncoder {
    pub fn new(ffmpeg: PathBuf, resolver: CompatibilityResolver) -> Self {
        Self {
            ffmpeg,
            resolver,
            profile: TranscodeProfile::default(),
            segment_secs: 6,
            segment_type: SegmentType::default(),
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_profile(mut self, profile: TranscodeProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_segments(mut self, segment_secs: u32, segment_type: SegmentType) -> Self {
        self.segment_secs = segment_secs;
        self.segment_type = segment_type;
        self
    }
}

#[async_trait]
impl TrackEncoder for FfmpegTrackEncoder {
    async fn encode(&self, request: &TrackEncodeRequest) -> Result<PathBuf> {
        let source = &request.file_path;
        let stamp = SourceStamp::of(source).await?;

        let resolution = self
            .resolver
            .resolve(request.requested, std::slice::from_ref(source))
            .await;
        if resolution.downgraded {
            tracing::info!(
                track_id = %request.track_id,
                reason = resolution.reason.as_deref().unwrap_or("unknown"),
                "Track cannot be stream-copied, encoding for web"
            );
        }

        let staging = track_cache::staging_dir(request.track_id, source);
        files::remove_dir_if_exists(&staging).await?;
        tokio::fs::create_dir_all(&staging).await?;

        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(vod_hls_args(
            source,
            &staging,
            resolution.mode,
            &self.profile,
            self.segment_secs,
            self.segment_type,
        ))
        .current_dir(&staging)
        .timeout(self.timeout);

        let verified = match cmd.execute().await {
            Ok(_) => files::read_playlist(&staging)
                .await
                .as_ref()
                .and_then(TrackHlsEntry::from_playlist)
                .is_some(),
            Err(e) => {
                let _ = files::remove_dir_if_exists(&staging).await;
                return Err(e.into());
            }
        };
        if !verified {
            let _ = files::remove_dir_if_exists(&staging).await;
            return Err(Error::Encode(format!(
                "encoder produced no finished playlist for track {}",
                request.track_id
            )));
        }

        let dir = track_cache::publish(request.track_id, source, &staging, &stamp).await?;
        Ok(dir)
    }
}

/// In-process queue with a single worker task.
#[derive(Clone)]
pub struct LocalEncodeQueue {
    tx: mpsc::Sender<TrackEncodeRequest>,
    pending: Arc<DashSet<TrackId>>,
}

impl LocalEncodeQueue {
    /// Start the worker. The queue holds at most `capacity` requests.
    pub fn start(encoder: Arc<dyn TrackEncoder>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<TrackEncodeRequest>(capacity.max(1));
        let pending: Arc<DashSet<TrackId>> = Arc::new(DashSet::new());

        let worker_pending = Arc::clone(&pending);
        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let track_id = request.track_id;
                tracing::info!(
                    track_id = %track_id,
                    path = %request.file_path.display(),
                    "Encoding track cache"
                );
                match encoder.encode(&request).await {
                    Ok(dir) => {
                        tracing::info!(track_id = %track_id, dir = %dir.display(), "Track cache ready")
                    }
                    Err(e) => tracing::warn!(track_id = %track_id, "Track encode failed: {}", e),
                }
                worker_pending.remove(&track_id);
            }
        });

        (Self { tx, pending }, handle)
    }

    /// Tracks queued or encoding.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, track_id: TrackId) -> bool {
        self.pending.contains(&track_id)
    }
}

impl EncodeQueue for LocalEncodeQueue {
    fn enqueue(&self, request: TrackEncodeRequest) -> bool {
        let track_id = request.track_id;
        if !self.pending.insert(track_id) {
            return false;
        }
        match self.tx.try_send(request) {
            Ok(()) => {
                tracing::debug!(track_id = %track_id, "Queued track encode");
                true
            }
            Err(e) => {
                self.pending.remove(&track_id);
                tracing::warn!(track_id = %track_id, "Encode queue rejected request: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for LocalEncodeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEncodeQueue")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    struct GatedEncoder {
        gate: Semaphore,
        seen: Mutex<Vec<TrackId>>,
    }

    #[async_trait]
    impl TrackEncoder for GatedEncoder {
        async fn encode(&self, request: &TrackEncodeRequest) -> Result<PathBuf> {
            let _permit = self.gate.acquire().await.map_err(|e| Error::Internal(e.to_string()))?;
            self.seen.lock().push(request.track_id);
            Ok(PathBuf::from("/tmp/done"))
        }
    }

    fn request(id: i64) -> TrackEncodeRequest {
        TrackEncodeRequest {
            track_id: TrackId::new(id),
            file_path: PathBuf::from(format!("/media/{id}.mp4")),
            requested: EncodingMode::Copy,
        }
    }

    async fn wait_idle(queue: &LocalEncodeQueue) {
        for _ in 0..200 {
            if queue.pending() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not drain");
    }

    #[tokio::test]
    async fn test_pending_tracks_are_deduplicated() {
        let encoder = Arc::new(GatedEncoder {
            gate: Semaphore::new(0),
            seen: Mutex::new(Vec::new()),
        });
        let (queue, _worker) = LocalEncodeQueue::start(encoder.clone(), 16);

        assert!(queue.enqueue(request(1)));
        assert!(!queue.enqueue(request(1)));
        assert!(queue.enqueue(request(2)));
        assert!(queue.is_pending(TrackId::new(1)));

        encoder.gate.add_permits(10);
        wait_idle(&queue).await;
        assert_eq!(*encoder.seen.lock(), vec![TrackId::new(1), TrackId::new(2)]);

        // Finished tracks can be queued again.
        assert!(queue.enqueue(request(1)));
        wait_idle(&queue).await;
        assert_eq!(encoder.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let encoder = Arc::new(GatedEncoder {
            gate: Semaphore::new(0),
            seen: Mutex::new(Vec::new()),
        });
        let (queue, _worker) = LocalEncodeQueue::start(encoder.clone(), 1);

        assert!(queue.enqueue(request(1)));
        // Give the worker time to pick up the first request.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.enqueue(request(2)));
        assert!(!queue.enqueue(request(3)));
        assert!(!queue.is_pending(TrackId::new(3)));

        encoder.gate.add_permits(10);
        wait_idle(&queue).await;
    }
}

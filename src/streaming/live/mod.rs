//! Live HLS sessions.
//!
//! One session per active stream, each owning a real-time encoder that reads
//! the stream's playback plan through the concat demuxer and writes a rolling
//! playlist into `<hls_dir>/stream-<id>/`. Sessions are created on the first
//! playlist request and stopped when nobody has asked for them for the idle
//! timeout.
//!
//! ```text
//! Absent -> Starting -> Running <-> Restarting -> Stopping -> Absent
//! ```

mod generator;
pub mod pidfile;

pub use generator::{EncoderExit, EncoderLauncher, EncoderProcess, EncoderSpec, FfmpegLauncher};
pub use crate::streaming::files::{resolve_segment, wait_for_file, wait_ready};

use chrono::{DateTime, Utc};
use clipcast_av::{
    CompatibilityResolver, ProcessInspector, Resolution, SegmentType, ToolPaths, TranscodeProfile,
};
use clipcast_common::{Error, ItemId, PlaylistItem, Result, StreamDefinition, StreamId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{StreamingConfig, TranscodeConfig};
use crate::streaming::files;

/// Timings and encoder parameters of live sessions.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// Parent of session directories and PID sidecars.
    pub root: PathBuf,
    pub segment_secs: u32,
    pub list_size: u32,
    pub segment_type: SegmentType,
    pub profile: TranscodeProfile,
    /// Encoder executable name, matched against orphan command lines.
    pub encoder_binary: String,
    /// Runs shorter than this count as failures.
    pub fast_fail: Duration,
    pub backoff_unit: Duration,
    pub backoff_cap: Duration,
    /// Consecutive fast failures before the session is torn down.
    pub max_failures: u32,
    pub restart_pause: Duration,
    pub kill_grace: Duration,
    /// How long `stop` waits for the generator task.
    pub stop_timeout: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("clipcast-hls"),
            segment_secs: 6,
            list_size: 10,
            segment_type: SegmentType::default(),
            profile: TranscodeProfile::default(),
            encoder_binary: "ffmpeg".to_string(),
            fast_fail: Duration::from_secs(2),
            backoff_unit: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(10),
            max_failures: 10,
            restart_pause: Duration::from_secs(1),
            kill_grace: clipcast_av::process::DEFAULT_KILL_GRACE,
            stop_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

impl LiveSettings {
    pub fn from_config(
        streaming: &StreamingConfig,
        transcode: &TranscodeConfig,
        tools: &ToolPaths,
    ) -> Self {
        Self {
            root: streaming.hls_dir.clone(),
            segment_secs: streaming.segment_duration_secs,
            list_size: streaming.list_size(),
            segment_type: streaming.segment_type,
            profile: transcode.profile(),
            encoder_binary: tools.ffmpeg_name(),
            idle_timeout: streaming.idle_timeout(),
            sweep_interval: streaming.sweep_interval(),
            ..Self::default()
        }
    }

    pub fn session_dir(&self, stream_id: StreamId) -> PathBuf {
        self.root.join(format!("stream-{}", stream_id))
    }

    pub fn pidfile(&self, stream_id: StreamId) -> PathBuf {
        self.root.join(format!("stream-{}.pid.json", stream_id))
    }

    /// Delay after the `failures`-th consecutive fast failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(failures)
            .min(self.backoff_cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Running,
    Restarting,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Restarting => write!(f, "restarting"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// A live session.
pub struct LiveSession {
    stream_id: StreamId,
    session_id: Uuid,
    dir: PathBuf,
    pidfile: PathBuf,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    last_access: Mutex<Instant>,
    stopped: AtomicBool,
    cursor: AtomicU64,
    pid: Mutex<Option<u32>>,
    launches: AtomicU32,
    resolution: Mutex<Option<Resolution>>,
    plan: Mutex<Vec<PlaylistItem>>,
    cancel: CancellationToken,
    /// Cancelled once the session's files are cleaned up.
    done: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Session being torn down in the same directory.
    predecessor: Mutex<Option<Arc<LiveSession>>>,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub pid: Option<u32>,
    pub segment_cursor: u64,
    pub launches: u32,
    pub encoding: Option<Resolution>,
    pub plan: Vec<ItemId>,
}

impl LiveSession {
    fn new(settings: &LiveSettings, stream_id: StreamId) -> Self {
        Self {
            stream_id,
            session_id: Uuid::new_v4(),
            dir: settings.session_dir(stream_id),
            pidfile: settings.pidfile(stream_id),
            started_at: Utc::now(),
            state: Mutex::new(SessionState::Starting),
            last_access: Mutex::new(Instant::now()),
            stopped: AtomicBool::new(false),
            cursor: AtomicU64::new(0),
            pid: Mutex::new(None),
            launches: AtomicU32::new(0),
            resolution: Mutex::new(None),
            plan: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            task: Mutex::new(None),
            predecessor: Mutex::new(None),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Working directory the encoder writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pidfile(&self) -> &Path {
        &self.pidfile
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Record a request for this session.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    /// Index the next encoder run starts numbering segments at.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    /// Encoder runs started so far.
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution.lock().clone()
    }

    /// Playback order of the current encoder run.
    pub fn plan(&self) -> Vec<PlaylistItem> {
        self.plan.lock().clone()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id,
            state: self.state(),
            started_at: self.started_at,
            idle_secs: self.last_access().elapsed().as_secs(),
            pid: self.pid(),
            segment_cursor: self.cursor(),
            launches: self.launches(),
            encoding: self.resolution(),
            plan: self.plan.lock().iter().map(|i| i.item_id).collect(),
        }
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != SessionState::Stopping {
            *current = state;
        }
    }

    /// Returns `true` for the caller that actually stopped the session.
    fn mark_stopped(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        *self.state.lock() = SessionState::Stopping;
        first
    }

    /// Move the cursor past `highest_on_disk`; never moves it back.
    fn resume_cursor(&self, highest_on_disk: Option<u64>) -> u64 {
        if let Some(highest) = highest_on_disk {
            self.cursor.fetch_max(highest + 1, Ordering::SeqCst);
        }
        self.cursor()
    }

    fn record_launch(&self, pid: Option<u32>) {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.pid.lock() = pid;
    }

    fn clear_pid(&self) {
        *self.pid.lock() = None;
    }

    fn set_resolution(&self, resolution: Resolution) {
        *self.resolution.lock() = Some(resolution);
    }

    fn set_plan(&self, plan: Vec<PlaylistItem>) {
        *self.plan.lock() = plan;
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("stream_id", &self.stream_id)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("dir", &self.dir)
            .finish()
    }
}

struct ManagerInner {
    sessions: DashMap<StreamId, Arc<LiveSession>>,
    settings: LiveSettings,
    launcher: Arc<dyn EncoderLauncher>,
    resolver: CompatibilityResolver,
    inspector: Arc<dyn ProcessInspector>,
}

impl ManagerInner {
    /// Remove a session's PID sidecar and working directory.
    async fn cleanup(&self, session: &LiveSession) {
        if let Err(e) = pidfile::remove(session.pidfile()).await {
            tracing::warn!(stream_id = %session.stream_id, "Failed to remove PID sidecar: {}", e);
        }
        if let Err(e) = files::remove_dir_if_exists(session.dir()).await {
            tracing::warn!(
                stream_id = %session.stream_id,
                dir = %session.dir.display(),
                "Failed to remove session directory: {}",
                e
            );
        }
        session.done.cancel();
    }

    /// Tear down from inside the generator task.
    async fn teardown(&self, session: &Arc<LiveSession>, reason: &str) {
        session.mark_stopped();
        self.cleanup(session).await;
        self.sessions
            .remove_if(&session.stream_id, |_, current| Arc::ptr_eq(current, session));
        tracing::info!(
            stream_id = %session.stream_id,
            session_id = %session.session_id,
            reason,
            "Live session stopped"
        );
    }
}

/// Owns every live session.
#[derive(Clone)]
pub struct LiveSessionManager {
    inner: Arc<ManagerInner>,
}

impl LiveSessionManager {
    pub fn new(
        settings: LiveSettings,
        launcher: Arc<dyn EncoderLauncher>,
        resolver: CompatibilityResolver,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: DashMap::new(),
                settings,
                launcher,
                resolver,
                inspector,
            }),
        }
    }

    pub fn settings(&self) -> &LiveSettings {
        &self.inner.settings
    }

    pub fn get(&self, stream_id: StreamId) -> Option<Arc<LiveSession>> {
        self.inner.sessions.get(&stream_id).map(|s| Arc::clone(s.value()))
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Return the running session for `stream`, starting one if needed.
    ///
    /// The session is registered before this returns and the encoder starts
    /// in the background, so concurrent callers share one session.
    pub fn ensure_session(&self, stream: &StreamDefinition) -> Result<Arc<LiveSession>> {
        if !stream.is_active() {
            return Err(Error::Conflict(format!("stream {} is not active", stream.id)));
        }
        if !stream.items.iter().any(|i| i.available) {
            return Err(Error::not_found("playable items for stream", stream.id));
        }

        let session = match self.inner.sessions.entry(stream.id) {
            Entry::Occupied(entry) if !entry.get().is_stopped() => {
                let session = Arc::clone(entry.get());
                session.touch();
                return Ok(session);
            }
            Entry::Occupied(mut entry) => {
                let previous = Arc::clone(entry.get());
                let session = self.start(stream, Some(previous));
                entry.insert(Arc::clone(&session));
                session
            }
            Entry::Vacant(entry) => {
                let session = self.start(stream, None);
                entry.insert(Arc::clone(&session));
                session
            }
        };

        tracing::info!(
            stream_id = %stream.id,
            session_id = %session.session_id,
            "Live session starting"
        );
        Ok(session)
    }

    fn start(
        &self,
        stream: &StreamDefinition,
        predecessor: Option<Arc<LiveSession>>,
    ) -> Arc<LiveSession> {
        let session = Arc::new(LiveSession::new(&self.inner.settings, stream.id));
        *session.predecessor.lock() = predecessor;

        let handle = tokio::spawn(generator::run(
            Arc::clone(&self.inner),
            Arc::clone(&session),
            stream.clone(),
        ));
        *session.task.lock() = Some(handle);
        session
    }

    /// Stop a session and delete its files. Returns whether this call
    /// stopped a running session.
    pub async fn stop(&self, stream_id: StreamId, reason: &str) -> bool {
        let Some(session) = self.get(stream_id) else {
            return false;
        };

        if !session.mark_stopped() {
            // Someone else is stopping it.
            let bound = self.inner.settings.stop_timeout + self.inner.settings.kill_grace;
            let _ = tokio::time::timeout(bound, session.done.cancelled()).await;
            return false;
        }

        session.cancel.cancel();
        let handle = session.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.inner.settings.stop_timeout, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(stream_id = %stream_id, "Generator task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.inner.cleanup(&session).await;
        self.inner
            .sessions
            .remove_if(&stream_id, |_, current| Arc::ptr_eq(current, &session));

        tracing::info!(
            stream_id = %stream_id,
            session_id = %session.session_id,
            reason,
            "Live session stopped"
        );
        true
    }

    /// Stop and start again, picking up catalog changes.
    pub async fn restart(&self, stream: &StreamDefinition) -> Result<Arc<LiveSession>> {
        self.stop(stream.id, "restart").await;
        self.ensure_session(stream)
    }

    pub async fn stop_all(&self, reason: &str) {
        let ids: Vec<StreamId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.stop(id, reason).await;
        }
    }

    /// Stop sessions nobody has requested for the idle timeout.
    pub async fn sweep_idle(&self) -> Vec<StreamId> {
        self.sweep_idle_at(Instant::now()).await
    }

    pub async fn sweep_idle_at(&self, now: Instant) -> Vec<StreamId> {
        let timeout = self.inner.settings.idle_timeout;
        let idle: Vec<StreamId> = self
            .inner
            .sessions
            .iter()
            .filter(|e| {
                !e.is_stopped() && now.saturating_duration_since(e.last_access()) > timeout
            })
            .map(|e| *e.key())
            .collect();

        for id in &idle {
            self.stop(*id, "idle").await;
        }
        idle
    }

    /// Run [`LiveSessionManager::sweep_idle`] every sweep interval.
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.inner.settings.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let stopped = manager.sweep_idle().await;
                if !stopped.is_empty() {
                    tracing::info!(count = stopped.len(), "Stopped idle live sessions");
                }
            }
        })
    }
}

impl std::fmt::Debug for LiveSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSessionManager")
            .field("sessions", &self.inner.sessions.len())
            .field("root", &self.inner.settings.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let settings = LiveSettings::default();
        assert_eq!(settings.backoff(1), Duration::from_millis(500));
        assert_eq!(settings.backoff(4), Duration::from_secs(2));
        assert_eq!(settings.backoff(30), Duration::from_secs(10));
    }

    #[test]
    fn test_paths() {
        let settings = LiveSettings {
            root: PathBuf::from("/var/hls"),
            ..Default::default()
        };
        assert_eq!(settings.session_dir(StreamId::new(3)), PathBuf::from("/var/hls/stream-3"));
        assert_eq!(
            settings.pidfile(StreamId::new(3)),
            PathBuf::from("/var/hls/stream-3.pid.json")
        );
    }

    #[test]
    fn test_cursor_never_regresses() {
        let session = LiveSession::new(&LiveSettings::default(), StreamId::new(1));
        assert_eq!(session.resume_cursor(None), 0);
        assert_eq!(session.resume_cursor(Some(5)), 6);
        assert_eq!(session.resume_cursor(Some(2)), 6);
        assert_eq!(session.resume_cursor(None), 6);
        assert_eq!(session.resume_cursor(Some(9)), 10);
    }

    #[test]
    fn test_stopping_state_is_final() {
        let session = LiveSession::new(&LiveSettings::default(), StreamId::new(1));
        assert!(session.mark_stopped());
        assert!(!session.mark_stopped());
        session.set_state(SessionState::Running);
        assert_eq!(session.state(), SessionState::Stopping);
    }
}

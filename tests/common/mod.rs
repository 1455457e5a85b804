//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] around fakes:
//! a scripted encoder launcher, an always-compatible prober, an in-memory
//! catalog and a recording encode queue. Media files, track caches and live
//! session directories live in per-harness temp directories. The
//! [`TestHarness::with_server`] constructor starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use clipcast::catalog::MemoryCatalog;
use clipcast::config::Config;
use clipcast::jobs::{EncodeQueue, TrackEncodeRequest};
use clipcast::server::{create_router, AppContext};
use clipcast::streaming::{
    EncoderExit, EncoderLauncher, EncoderProcess, EncoderSpec, LiveSessionManager, LiveSettings,
};
use clipcast_av::{
    CodecInfo, CodecProber, CompatibilityResolver, ProcessInspector, ProcessSignal, ProcessState,
    ToolPaths,
};
use clipcast_common::{
    EncodingMode, ItemId, PlaylistItem, StreamDefinition, StreamId, StreamStatus, TrackId,
};

/// How a fake encoder run behaves.
#[derive(Debug, Clone, Copy)]
pub enum RunScript {
    /// Write segments, then keep running until killed.
    Steady,
    /// Write segments, then exit with an error after the delay.
    ExitAfter(Duration),
    /// Keep running without ever producing a playlist.
    Silent,
    /// Fail to launch at all.
    LaunchError,
}

/// PIDs handed out by [`FakeLauncher`], far above any real PID range.
pub const FAKE_PID_BASE: u32 = 4_000_000;

/// Encoder launcher that writes a small playlist instead of running ffmpeg.
pub struct FakeLauncher {
    script: RunScript,
    runs: Mutex<VecDeque<RunScript>>,
    segments_per_run: u64,
    spawns: AtomicUsize,
    start_numbers: Mutex<Vec<u64>>,
    manifests: Mutex<Vec<String>>,
    live: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(script: RunScript) -> Self {
        Self {
            script,
            runs: Mutex::new(VecDeque::new()),
            segments_per_run: 3,
            spawns: AtomicUsize::new(0),
            start_numbers: Mutex::new(Vec::new()),
            manifests: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Play `runs` in order, one per launch, then fall back to the default.
    pub fn with_runs(self, runs: impl IntoIterator<Item = RunScript>) -> Self {
        *self.runs.lock() = runs.into_iter().collect();
        self
    }

    pub fn with_segments(mut self, segments_per_run: u64) -> Self {
        self.segments_per_run = segments_per_run;
        self
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Processes launched and not yet exited.
    pub fn running(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn start_numbers(&self) -> Vec<u64> {
        self.start_numbers.lock().clone()
    }

    /// File names listed in `concat.txt`, one list per launch.
    pub fn concat_orders(&self) -> Vec<Vec<String>> {
        self.manifests
            .lock()
            .iter()
            .map(|manifest| {
                manifest
                    .lines()
                    .filter_map(|line| line.strip_prefix("file '"))
                    .map(|path| {
                        let path = path.trim_end_matches('\'');
                        Path::new(path)
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl EncoderLauncher for FakeLauncher {
    async fn launch(&self, spec: &EncoderSpec) -> clipcast_common::Result<Box<dyn EncoderProcess>> {
        let spawn = self.spawns.fetch_add(1, Ordering::SeqCst);
        self.start_numbers.lock().push(spec.options.start_number);
        let manifest = tokio::fs::read_to_string(spec.dir.join("concat.txt"))
            .await
            .unwrap_or_default();
        self.manifests.lock().push(manifest);

        let script = self.runs.lock().pop_front().unwrap_or(self.script);
        match script {
            RunScript::LaunchError => {
                return Err(clipcast_common::Error::Internal("no encoder here".into()));
            }
            RunScript::Silent => {}
            RunScript::Steady | RunScript::ExitAfter(_) => {
                write_live_output(&spec.dir, spec.options.start_number, self.segments_per_run)
                    .await?;
            }
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            pid: FAKE_PID_BASE + spawn as u32,
            exit_after: match script {
                RunScript::ExitAfter(delay) => Some(delay),
                _ => None,
            },
            killed: CancellationToken::new(),
            live: Arc::clone(&self.live),
            exited: false,
        }))
    }
}

struct FakeProcess {
    pid: u32,
    exit_after: Option<Duration>,
    killed: CancellationToken,
    live: Arc<AtomicUsize>,
    exited: bool,
}

impl FakeProcess {
    fn finish(&mut self, exit: EncoderExit) -> EncoderExit {
        if !self.exited {
            self.exited = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        exit
    }
}

#[async_trait]
impl EncoderProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> std::io::Result<EncoderExit> {
        let failed = EncoderExit {
            success: false,
            code: Some(1),
        };
        let killed = EncoderExit {
            success: false,
            code: None,
        };
        match self.exit_after {
            Some(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(self.finish(failed)),
                    _ = self.killed.cancelled() => Ok(self.finish(killed)),
                }
            }
            None => {
                self.killed.cancelled().await;
                Ok(self.finish(killed))
            }
        }
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.killed.cancel();
        Ok(())
    }
}

/// Write `count` fMP4 segments from `start` plus a rolling playlist.
async fn write_live_output(dir: &Path, start: u64, count: u64) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join("init.mp4"), b"init").await?;

    let mut playlist = format!(
        "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:{}\n#EXT-X-MAP:URI=\"init.mp4\"\n",
        start
    );
    for index in start..start + count {
        let name = format!("segment-{:06}.m4s", index);
        tokio::fs::write(dir.join(&name), format!("segment {}", index)).await?;
        playlist.push_str(&format!("#EXTINF:6.000,\n{}\n", name));
    }
    let tmp = dir.join("playlist.m3u8.tmp");
    tokio::fs::write(&tmp, playlist).await?;
    tokio::fs::rename(&tmp, dir.join("playlist.m3u8")).await
}

/// Prober reporting every file as H.264/AAC.
pub struct CompatibleProber;

#[async_trait]
impl CodecProber for CompatibleProber {
    async fn probe(&self, _path: &Path) -> clipcast_av::Result<CodecInfo> {
        Ok(CodecInfo {
            video_codec: Some("h264".into()),
            audio_codec: Some("aac".into()),
            container: Some("mov,mp4,m4a,3gp,3g2,mj2".into()),
            duration_secs: Some(30.0),
        })
    }
}

/// Inspector for which every PID is dead.
pub struct NoProcesses;

impl ProcessInspector for NoProcesses {
    fn inspect(&self, _pid: u32, _binary: &str, _dir: &Path) -> ProcessState {
        ProcessState::Dead
    }

    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    fn signal(&self, _pid: u32, _signal: ProcessSignal) -> clipcast_av::Result<()> {
        Ok(())
    }
}

/// Inspector reporting one fixed state for every PID and recording signals.
pub struct RecordingInspector {
    state: ProcessState,
    dies_on_term: bool,
    alive: Mutex<bool>,
    inspected: Mutex<Vec<(u32, PathBuf)>>,
    signals: Mutex<Vec<(u32, ProcessSignal)>>,
}

impl RecordingInspector {
    pub fn new(state: ProcessState, dies_on_term: bool) -> Self {
        Self {
            state,
            dies_on_term,
            alive: Mutex::new(state != ProcessState::Dead),
            inspected: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn inspected(&self) -> Vec<(u32, PathBuf)> {
        self.inspected.lock().clone()
    }

    pub fn signals(&self) -> Vec<(u32, ProcessSignal)> {
        self.signals.lock().clone()
    }
}

impl ProcessInspector for RecordingInspector {
    fn inspect(&self, pid: u32, _binary: &str, dir: &Path) -> ProcessState {
        self.inspected.lock().push((pid, dir.to_path_buf()));
        if *self.alive.lock() {
            self.state
        } else {
            ProcessState::Dead
        }
    }

    fn is_alive(&self, _pid: u32) -> bool {
        *self.alive.lock()
    }

    fn signal(&self, pid: u32, signal: ProcessSignal) -> clipcast_av::Result<()> {
        self.signals.lock().push((pid, signal));
        if signal == ProcessSignal::Kill || self.dies_on_term {
            *self.alive.lock() = false;
        }
        Ok(())
    }
}

/// Encode queue that only records requests.
#[derive(Default)]
pub struct RecordingQueue {
    requests: Mutex<Vec<TrackEncodeRequest>>,
}

impl RecordingQueue {
    pub fn requests(&self) -> Vec<TrackEncodeRequest> {
        self.requests.lock().clone()
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.requests.lock().iter().map(|r| r.track_id).collect()
    }
}

impl EncodeQueue for RecordingQueue {
    fn enqueue(&self, request: TrackEncodeRequest) -> bool {
        let mut requests = self.requests.lock();
        if requests.iter().any(|r| r.track_id == request.track_id) {
            return false;
        }
        requests.push(request);
        true
    }
}

/// Live settings with timings short enough for tests.
pub fn fast_settings(root: &Path) -> LiveSettings {
    LiveSettings {
        root: root.to_path_buf(),
        fast_fail: Duration::from_millis(50),
        backoff_unit: Duration::from_millis(5),
        backoff_cap: Duration::from_millis(20),
        max_failures: 3,
        restart_pause: Duration::from_millis(10),
        kill_grace: Duration::from_millis(200),
        stop_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(60),
        ..LiveSettings::default()
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub catalog: Arc<MemoryCatalog>,
    pub launcher: Arc<FakeLauncher>,
    pub queue: Arc<RecordingQueue>,
    pub media: TempDir,
    pub hls: TempDir,
}

impl TestHarness {
    /// Default config, open access, steady encoder.
    pub fn new() -> Self {
        Self::with_options(Config::default(), FakeLauncher::new(RunScript::Steady), |_| {})
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_options(config, FakeLauncher::new(RunScript::Steady), |_| {})
    }

    pub fn with_launcher(launcher: FakeLauncher) -> Self {
        Self::with_options(Config::default(), launcher, |_| {})
    }

    /// Full control: `tune` adjusts the live settings after defaults are set.
    pub fn with_options(
        config: Config,
        launcher: FakeLauncher,
        tune: impl FnOnce(&mut LiveSettings),
    ) -> Self {
        Self::with_inspector(config, launcher, Arc::new(NoProcesses), tune)
    }

    /// Like [`TestHarness::with_options`] with a custom process inspector.
    pub fn with_inspector(
        mut config: Config,
        launcher: FakeLauncher,
        inspector: Arc<dyn ProcessInspector>,
        tune: impl FnOnce(&mut LiveSettings),
    ) -> Self {
        let media = tempfile::tempdir().expect("failed to create media dir");
        let hls = tempfile::tempdir().expect("failed to create hls dir");

        config.streaming.hls_dir = hls.path().to_path_buf();
        config.streaming.live_ready_timeout_secs = 2;
        config.streaming.segment_wait_secs = 1;

        let mut settings = fast_settings(hls.path());
        tune(&mut settings);

        let resolver = CompatibilityResolver::new(Arc::new(CompatibleProber))
            .with_timeout(Duration::from_millis(500));
        let launcher = Arc::new(launcher);
        let live = LiveSessionManager::new(
            settings,
            launcher.clone(),
            resolver.clone(),
            inspector,
        );

        let catalog = Arc::new(MemoryCatalog::default());
        let queue = Arc::new(RecordingQueue::default());
        let tools = ToolPaths {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        };

        let ctx = AppContext::new(config, catalog.clone(), queue.clone(), live, resolver, tools);

        Self {
            ctx,
            catalog,
            launcher,
            queue,
            media,
            hls,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::serve(Self::new()).await
    }

    /// Start an Axum server around an existing harness.
    pub async fn serve(harness: Self) -> (Self, SocketAddr) {
        let app = create_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .ok();
        });

        (harness, addr)
    }

    /// Create a stream with `count` items backed by small files on disk.
    ///
    /// Item ids are `id * 100 + n`, track ids `id * 1000 + n`. Active streams
    /// went online one minute ago.
    pub fn add_stream(
        &self,
        id: i64,
        status: StreamStatus,
        encoding: EncodingMode,
        count: u32,
    ) -> StreamDefinition {
        let items = (0..count)
            .map(|n| {
                let path = self.media.path().join(format!("stream{}-{}.mp4", id, n));
                std::fs::write(&path, vec![n as u8; 2048]).expect("failed to write media file");
                PlaylistItem {
                    position: n,
                    item_id: ItemId::new(id * 100 + n as i64),
                    track_id: TrackId::new(id * 1000 + n as i64),
                    file_path: path,
                    artist: Some(format!("Artist {}", n)),
                    available: true,
                    duration_secs: None,
                }
            })
            .collect();

        let stream = StreamDefinition {
            id: StreamId::new(id),
            name: format!("Stream {}", id),
            status,
            shuffle: false,
            encoding,
            online_since: (status == StreamStatus::Active)
                .then(|| Utc::now() - ChronoDuration::seconds(60)),
            items,
        };
        self.catalog.upsert(stream.clone());
        stream
    }

    /// Write a finished HLS cache for `item` with the given segment durations.
    pub fn write_track_cache(&self, item: &PlaylistItem, durations: &[f64]) -> PathBuf {
        let dir = clipcast::streaming::track_cache::cache_dir(item.track_id, &item.file_path);
        std::fs::create_dir_all(&dir).expect("failed to create cache dir");
        std::fs::write(dir.join("init.mp4"), b"init").expect("failed to write init");

        let mut playlist = String::from(
            "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-MAP:URI=\"init.mp4\"\n",
        );
        for (i, duration) in durations.iter().enumerate() {
            let name = format!("segment-{:06}.m4s", i);
            std::fs::write(dir.join(&name), format!("track {} segment {}", item.track_id, i))
                .expect("failed to write segment");
            playlist.push_str(&format!("#EXTINF:{:.3},\n{}\n", duration, name));
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        std::fs::write(dir.join("playlist.m3u8"), playlist).expect("failed to write playlist");
        dir
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

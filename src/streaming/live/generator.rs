//! Encoder launching and the per-session generator loop.

use async_trait::async_trait;
use clipcast_av::{
    concat_manifest, live_hls_args, terminate_orphan, LiveEncodeOptions, ToolCommand,
    CONCAT_FILENAME,
};
use clipcast_common::{Result, StreamDefinition, StreamId};
use clipcast_media::plan_items;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::pidfile::{self, PidRecord};
use super::{LiveSession, ManagerInner, SessionState};
use crate::streaming::files;

/// Everything needed to start one encoder run.
#[derive(Debug, Clone)]
pub struct EncoderSpec {
    pub stream_id: StreamId,
    pub session_id: Uuid,
    pub dir: PathBuf,
    pub options: LiveEncodeOptions,
}

/// How an encoder run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderExit {
    pub success: bool,
    pub code: Option<i32>,
}

/// A running encoder.
#[async_trait]
pub trait EncoderProcess: Send {
    fn id(&self) -> Option<u32>;

    async fn wait(&mut self) -> std::io::Result<EncoderExit>;

    /// Force-kill without waiting.
    fn start_kill(&mut self) -> std::io::Result<()>;
}

/// Starts encoder processes for live sessions.
#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    async fn launch(&self, spec: &EncoderSpec) -> Result<Box<dyn EncoderProcess>>;
}

/// Launches ffmpeg, forwarding its stderr to the log.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn launch(&self, spec: &EncoderSpec) -> Result<Box<dyn EncoderProcess>> {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(live_hls_args(&spec.dir, &spec.options))
            .current_dir(&spec.dir);

        let mut child = cmd.spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let stream_id = spec.stream_id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(stream_id = %stream_id, "ffmpeg: {}", line);
                }
            });
        }

        Ok(Box::new(FfmpegProcess { child }))
    }
}

struct FfmpegProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<EncoderExit> {
        let status = self.child.wait().await?;
        Ok(EncoderExit {
            success: status.success(),
            code: status.code(),
        })
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

enum LoopExit {
    Cancelled,
    CrashLoop,
}

/// Body of a session's background task.
pub(super) async fn run(inner: Arc<ManagerInner>, session: Arc<LiveSession>, stream: StreamDefinition) {
    let span = tracing::info_span!(
        "live_session",
        stream_id = %session.stream_id(),
        session_id = %session.session_id()
    );

    let outcome = drive(&inner, &session, &stream).instrument(span.clone()).await;

    async {
        match outcome {
            Ok(LoopExit::Cancelled) => tracing::debug!("Generator loop cancelled"),
            Ok(LoopExit::CrashLoop) => {
                tracing::error!(
                    failures = inner.settings.max_failures,
                    "Encoder is crash looping, tearing down live session"
                );
                inner.teardown(&session, "crash loop").await;
            }
            Err(e) => {
                tracing::error!("Live session failed: {}", e);
                inner.teardown(&session, "error").await;
            }
        }
    }
    .instrument(span)
    .await;
}

async fn drive(
    inner: &ManagerInner,
    session: &LiveSession,
    stream: &StreamDefinition,
) -> Result<LoopExit> {
    let settings = &inner.settings;
    let cancel = session.cancel.clone();

    let previous = session.predecessor.lock().take();
    if let Some(previous) = previous {
        let bound = settings.stop_timeout + settings.kill_grace;
        if tokio::time::timeout(bound, previous.done.cancelled()).await.is_err() {
            tracing::warn!("Previous session did not finish stopping in time");
        }
    }

    recover_orphan(inner, session).await;
    if cancel.is_cancelled() {
        return Ok(LoopExit::Cancelled);
    }

    files::remove_dir_if_exists(session.dir()).await?;
    tokio::fs::create_dir_all(session.dir()).await?;

    let mut plan = plan_items(stream.available_items(), stream.shuffle, stream.shuffle_seed());
    let sources: Vec<PathBuf> = plan.iter().map(|i| i.file_path.clone()).collect();
    let resolution = inner.resolver.resolve(stream.encoding, &sources).await;
    if resolution.downgraded {
        tracing::warn!(
            requested = %resolution.requested,
            reason = resolution.reason.as_deref().unwrap_or("unknown"),
            "Sources cannot be stream-copied, encoding for web instead"
        );
    }
    let mode = resolution.mode;
    session.set_resolution(resolution);

    let mut failures = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(LoopExit::Cancelled);
        }

        session.set_plan(plan.clone());
        let on_disk = files::highest_segment_index(session.dir()).await?;
        let start_number = session.resume_cursor(on_disk);

        let paths: Vec<&PathBuf> = plan.iter().map(|i| &i.file_path).collect();
        tokio::fs::write(session.dir().join(CONCAT_FILENAME), concat_manifest(&paths)).await?;

        let spec = EncoderSpec {
            stream_id: session.stream_id(),
            session_id: session.session_id(),
            dir: session.dir().to_path_buf(),
            options: LiveEncodeOptions {
                mode,
                profile: settings.profile.clone(),
                segment_secs: settings.segment_secs,
                list_size: settings.list_size,
                segment_type: settings.segment_type,
                start_number,
            },
        };

        let launched_at = Instant::now();
        match inner.launcher.launch(&spec).await {
            Ok(mut process) => {
                let pid = process.id();
                session.record_launch(pid);
                session.set_state(SessionState::Running);
                if let Some(pid) = pid {
                    let record = PidRecord::new(pid, session.dir());
                    if let Err(e) = pidfile::write(session.pidfile(), &record).await {
                        tracing::warn!(pid, "Failed to write PID sidecar: {}", e);
                    }
                }
                tracing::info!(pid = ?pid, start_number, %mode, "Encoder started");

                let exit = tokio::select! {
                    exit = process.wait() => Some(exit),
                    _ = cancel.cancelled() => None,
                };

                match exit {
                    None => {
                        kill_encoder(&mut *process, settings.kill_grace).await;
                        session.clear_pid();
                        return Ok(LoopExit::Cancelled);
                    }
                    Some(Ok(exit)) if exit.success => {
                        tracing::info!("Encoder reached the end of the playlist")
                    }
                    Some(Ok(exit)) => tracing::warn!(code = ?exit.code, "Encoder exited with an error"),
                    Some(Err(e)) => tracing::warn!("Failed to wait for encoder: {}", e),
                }
                session.clear_pid();
                if let Err(e) = pidfile::remove(session.pidfile()).await {
                    tracing::warn!("Failed to remove PID sidecar: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to launch encoder: {}", e),
        }

        let ran_for = launched_at.elapsed();
        let pause = if ran_for < settings.fast_fail {
            failures += 1;
            tracing::warn!(
                failures,
                ran_ms = ran_for.as_millis() as u64,
                "Encoder exited quickly"
            );
            if failures >= settings.max_failures {
                return Ok(LoopExit::CrashLoop);
            }
            if !plan.is_empty() {
                plan.rotate_left(1);
            }
            settings.backoff(failures)
        } else {
            failures = 0;
            settings.restart_pause
        };

        session.set_state(SessionState::Restarting);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = cancel.cancelled() => return Ok(LoopExit::Cancelled),
        }
    }
}

async fn kill_encoder(process: &mut dyn EncoderProcess, grace: Duration) {
    if let Err(e) = process.start_kill() {
        tracing::debug!("Encoder already gone: {}", e);
    }
    if tokio::time::timeout(grace, process.wait()).await.is_err() {
        tracing::warn!("Encoder did not exit after kill");
    }
}

/// Terminate an encoder left behind by a previous process and drop its
/// sidecar.
async fn recover_orphan(inner: &ManagerInner, session: &LiveSession) {
    let Some(record) = pidfile::read(session.pidfile()).await else {
        return;
    };

    match terminate_orphan(
        inner.inspector.as_ref(),
        record.pid,
        &inner.settings.encoder_binary,
        session.dir(),
        inner.settings.kill_grace,
    )
    .await
    {
        Ok(true) => tracing::warn!(pid = record.pid, "Terminated orphaned encoder"),
        Ok(false) => tracing::debug!(pid = record.pid, "Discarding stale PID sidecar"),
        Err(e) => tracing::warn!(pid = record.pid, "Failed to terminate orphaned encoder: {}", e),
    }

    if let Err(e) = pidfile::remove(session.pidfile()).await {
        tracing::warn!("Failed to remove stale PID sidecar: {}", e);
    }
}

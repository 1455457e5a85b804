//! OS process inspection for encoders left behind by a previous run.
//!
//! A live encoder's PID is persisted next to its output directory. After a
//! crash or restart the PID may belong to a still-running orphan, or it may
//! have been recycled for an unrelated process. Only a process whose command
//! line names both the encoder binary and the session directory is killed.

use std::path::Path;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::{Error, Result};

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// What a persisted PID refers to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// A live encoder writing into the session directory.
    OwnsDirectory,
    /// Alive, but some other program.
    Unrelated,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Term,
    Kill,
}

/// Inspects and signals OS processes.
pub trait ProcessInspector: Send + Sync {
    /// Classify `pid` against the expected encoder binary and directory.
    fn inspect(&self, pid: u32, binary: &str, dir: &Path) -> ProcessState;

    fn is_alive(&self, pid: u32) -> bool;

    fn signal(&self, pid: u32, signal: ProcessSignal) -> Result<()>;
}

/// [`ProcessInspector`] backed by the process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessInspector;

impl SystemProcessInspector {
    fn command_line(pid: u32) -> Option<Vec<String>> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        system.process(pid).map(|process| {
            process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect()
        })
    }
}

impl ProcessInspector for SystemProcessInspector {
    fn inspect(&self, pid: u32, binary: &str, dir: &Path) -> ProcessState {
        match Self::command_line(pid) {
            None => ProcessState::Dead,
            Some(cmd) => classify_command_line(&cmd, binary, dir),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::kill;
            use nix::unistd::Pid as NixPid;

            match kill(NixPid::from_raw(pid as i32), None) {
                Ok(()) => true,
                Err(Errno::EPERM) => true,
                Err(_) => false,
            }
        }
        #[cfg(not(unix))]
        {
            Self::command_line(pid).is_some()
        }
    }

    fn signal(&self, pid: u32, signal: ProcessSignal) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid as NixPid;

            let sig = match signal {
                ProcessSignal::Term => Signal::SIGTERM,
                ProcessSignal::Kill => Signal::SIGKILL,
            };
            kill(NixPid::from_raw(pid as i32), sig)
                .map_err(|e| Error::Io(std::io::Error::from_raw_os_error(e as i32)))
        }
        #[cfg(not(unix))]
        {
            let _ = (pid, signal);
            Err(Error::Unsupported("process signals".to_string()))
        }
    }
}

/// Decide whether a command line belongs to an encoder for `dir`.
pub fn classify_command_line(cmd: &[String], binary: &str, dir: &Path) -> ProcessState {
    if cmd.is_empty() {
        return ProcessState::Unrelated;
    }

    let runs_binary = Path::new(&cmd[0])
        .file_name()
        .map(|name| name.to_string_lossy() == binary)
        .unwrap_or(false);

    // Component-wise, so `stream-1` does not claim `stream-10/...`.
    let references_dir = cmd.iter().any(|arg| Path::new(arg).starts_with(dir));

    if runs_binary && references_dir {
        ProcessState::OwnsDirectory
    } else {
        ProcessState::Unrelated
    }
}

/// Terminate an orphaned encoder if `pid` still owns `dir`.
///
/// Sends SIGTERM, waits up to `grace` for exit, then SIGKILL. Returns whether
/// a process was signalled.
pub async fn terminate_orphan(
    inspector: &dyn ProcessInspector,
    pid: u32,
    binary: &str,
    dir: &Path,
    grace: Duration,
) -> Result<bool> {
    if inspector.inspect(pid, binary, dir) != ProcessState::OwnsDirectory {
        return Ok(false);
    }

    #[cfg(feature = "tracing")]
    tracing::warn!(pid, dir = %dir.display(), "terminating orphaned encoder");

    inspector.signal(pid, ProcessSignal::Term)?;

    let poll = Duration::from_millis(100).min(grace.max(Duration::from_millis(1)));
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !inspector.is_alive(pid) {
            return Ok(true);
        }
        tokio::time::sleep(poll).await;
    }

    if inspector.is_alive(pid) {
        #[cfg(feature = "tracing")]
        tracing::warn!(pid, "orphaned encoder ignored SIGTERM, sending SIGKILL");
        inspector.signal(pid, ProcessSignal::Kill)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeInspector {
        state: ProcessState,
        dies_on_term: bool,
        alive: Mutex<bool>,
        signals: Mutex<Vec<ProcessSignal>>,
    }

    impl FakeInspector {
        fn new(state: ProcessState, dies_on_term: bool) -> Self {
            Self {
                state,
                dies_on_term,
                alive: Mutex::new(state != ProcessState::Dead),
                signals: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessInspector for FakeInspector {
        fn inspect(&self, _pid: u32, _binary: &str, _dir: &Path) -> ProcessState {
            self.state
        }

        fn is_alive(&self, _pid: u32) -> bool {
            *self.alive.lock().unwrap()
        }

        fn signal(&self, _pid: u32, signal: ProcessSignal) -> Result<()> {
            self.signals.lock().unwrap().push(signal);
            if signal == ProcessSignal::Kill || self.dies_on_term {
                *self.alive.lock().unwrap() = false;
            }
            Ok(())
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_command_line() {
        let dir = Path::new("/tmp/clipcast-hls/stream-7");
        let encoder = args(&[
            "/usr/bin/ffmpeg",
            "-i",
            "/tmp/clipcast-hls/stream-7/concat.txt",
        ]);
        assert_eq!(classify_command_line(&encoder, "ffmpeg", dir), ProcessState::OwnsDirectory);

        let other_stream = args(&["ffmpeg", "-i", "/tmp/clipcast-hls/stream-8/concat.txt"]);
        assert_eq!(classify_command_line(&other_stream, "ffmpeg", dir), ProcessState::Unrelated);

        let sibling = args(&[
            "/usr/bin/ffmpeg",
            "-i",
            "/tmp/clipcast-hls/stream-70/concat.txt",
        ]);
        assert_eq!(classify_command_line(&sibling, "ffmpeg", dir), ProcessState::Unrelated);

        let recycled = args(&["/usr/bin/vim", "/tmp/clipcast-hls/stream-7/playlist.m3u8"]);
        assert_eq!(classify_command_line(&recycled, "ffmpeg", dir), ProcessState::Unrelated);

        assert_eq!(classify_command_line(&[], "ffmpeg", dir), ProcessState::Unrelated);
    }

    #[tokio::test]
    async fn test_orphan_exits_on_term() {
        let inspector = FakeInspector::new(ProcessState::OwnsDirectory, true);
        let killed = terminate_orphan(&inspector, 10, "ffmpeg", Path::new("/x"), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(killed);
        assert_eq!(*inspector.signals.lock().unwrap(), vec![ProcessSignal::Term]);
    }

    #[tokio::test]
    async fn test_stubborn_orphan_gets_killed() {
        let inspector = FakeInspector::new(ProcessState::OwnsDirectory, false);
        terminate_orphan(&inspector, 10, "ffmpeg", Path::new("/x"), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(
            *inspector.signals.lock().unwrap(),
            vec![ProcessSignal::Term, ProcessSignal::Kill]
        );
    }

    #[tokio::test]
    async fn test_unrelated_process_is_left_alone() {
        for state in [ProcessState::Unrelated, ProcessState::Dead] {
            let inspector = FakeInspector::new(state, true);
            let killed = terminate_orphan(&inspector, 10, "ffmpeg", Path::new("/x"), Duration::from_millis(50))
                .await
                .unwrap();
            assert!(!killed);
            assert!(inspector.signals.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn test_own_process_is_alive() {
        let inspector = SystemProcessInspector;
        assert!(inspector.is_alive(std::process::id()));
        assert_ne!(
            inspector.inspect(std::process::id(), "ffmpeg", Path::new("/nonexistent")),
            ProcessState::OwnsDirectory
        );
    }
}

//! Codec compatibility checks for stream-copy output.
//!
//! Copy and original modes pass source streams straight into HLS segments,
//! which only plays in browsers when the sources are already H.264 video and
//! AAC audio. A small sample of the playlist is probed; any doubt downgrades
//! the stream to the baseline web transcode.

use async_trait::async_trait;
use clipcast_common::EncodingMode;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::probe::{probe_codecs, CodecInfo};
use crate::Result;

/// Number of files probed per resolution.
pub const DEFAULT_SAMPLE_SIZE: usize = 3;

/// Per-file probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const COMPATIBLE_VIDEO: &str = "h264";
const COMPATIBLE_AUDIO: &str = "aac";

/// Something that can read codec names from a media file.
#[async_trait]
pub trait CodecProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<CodecInfo>;
}

/// [`CodecProber`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(ffprobe: PathBuf, timeout: Duration) -> Self {
        Self { ffprobe, timeout }
    }
}

#[async_trait]
impl CodecProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<CodecInfo> {
        probe_codecs(&self.ffprobe, path, self.timeout).await
    }
}

/// Check a probe result against the baseline codecs.
///
/// Missing streams are fine (audio-only or silent video); present streams
/// must match.
pub fn check_codecs(info: &CodecInfo) -> std::result::Result<(), String> {
    if let Some(video) = info.video_codec.as_deref() {
        if video != COMPATIBLE_VIDEO {
            return Err(format!("video codec {} is not {}", video, COMPATIBLE_VIDEO));
        }
    }
    if let Some(audio) = info.audio_codec.as_deref() {
        if audio != COMPATIBLE_AUDIO {
            return Err(format!("audio codec {} is not {}", audio, COMPATIBLE_AUDIO));
        }
    }
    Ok(())
}

/// Outcome of [`CompatibilityResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub requested: EncodingMode,
    pub mode: EncodingMode,
    pub downgraded: bool,
    /// Why the request was downgraded.
    pub reason: Option<String>,
}

impl Resolution {
    fn honoured(mode: EncodingMode) -> Self {
        Self {
            requested: mode,
            mode,
            downgraded: false,
            reason: None,
        }
    }

    fn downgraded(requested: EncodingMode, reason: String) -> Self {
        Self {
            requested,
            mode: EncodingMode::Web,
            downgraded: true,
            reason: Some(reason),
        }
    }
}

/// Decides the effective encoding mode for a set of source files.
#[derive(Clone)]
pub struct CompatibilityResolver {
    prober: Arc<dyn CodecProber>,
    sample_size: usize,
    timeout: Duration,
}

impl CompatibilityResolver {
    pub fn new(prober: Arc<dyn CodecProber>) -> Self {
        Self {
            prober,
            sample_size: DEFAULT_SAMPLE_SIZE,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    /// Probe one file. Timeouts and probe errors count as incompatible.
    pub async fn check_file(&self, path: &Path) -> std::result::Result<CodecInfo, String> {
        match tokio::time::timeout(self.timeout, self.prober.probe(path)).await {
            Ok(Ok(info)) => check_codecs(&info).map(|_| info),
            Ok(Err(e)) => Err(format!("probe of {} failed: {}", path.display(), e)),
            Err(_) => Err(format!(
                "probe of {} timed out after {:?}",
                path.display(),
                self.timeout
            )),
        }
    }

    /// Resolve the effective mode for `files`.
    ///
    /// `transcode` and `web` are returned without probing. `copy` and
    /// `original` are honoured only if every sampled file is compatible.
    pub async fn resolve(&self, requested: EncodingMode, files: &[PathBuf]) -> Resolution {
        if !requested.needs_compatible_source() {
            return Resolution::honoured(requested);
        }

        for path in files.iter().take(self.sample_size) {
            if let Err(reason) = self.check_file(path).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(path = %path.display(), %reason, "source not stream-copy compatible");
                return Resolution::downgraded(requested, reason);
            }
        }

        Resolution::honoured(requested)
    }
}

impl std::fmt::Debug for CompatibilityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompatibilityResolver")
            .field("sample_size", &self.sample_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers per file name; `None` sleeps past any sane timeout.
    struct FakeProber {
        answers: HashMap<String, Option<CodecInfo>>,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn new(answers: Vec<(&str, Option<CodecInfo>)>) -> Self {
            Self {
                answers: answers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CodecProber for FakeProber {
        async fn probe(&self, path: &Path) -> Result<CodecInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            match self.answers.get(&name).cloned().flatten() {
                Some(info) => Ok(info),
                None => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(CodecInfo::default())
                }
            }
        }
    }

    fn codecs(video: &str, audio: &str) -> Option<CodecInfo> {
        Some(CodecInfo {
            video_codec: Some(video.into()),
            audio_codec: Some(audio.into()),
            ..Default::default()
        })
    }

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/media").join(n)).collect()
    }

    #[test]
    fn test_check_codecs() {
        assert!(check_codecs(&codecs("h264", "aac").unwrap()).is_ok());
        assert!(check_codecs(&codecs("hevc", "aac").unwrap()).is_err());
        assert!(check_codecs(&codecs("h264", "opus").unwrap()).is_err());
        assert!(check_codecs(&CodecInfo::default()).is_ok());
    }

    #[tokio::test]
    async fn test_transcode_modes_skip_probing() {
        let prober = Arc::new(FakeProber::new(vec![]));
        let resolver = CompatibilityResolver::new(prober.clone());

        let resolution = resolver.resolve(EncodingMode::Transcode, &files(&["a.mp4"])).await;
        assert_eq!(resolution.mode, EncodingMode::Transcode);
        assert!(!resolution.downgraded);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compatible_copy_is_honoured() {
        let prober = Arc::new(FakeProber::new(vec![
            ("a.mp4", codecs("h264", "aac")),
            ("b.mp4", codecs("h264", "aac")),
            ("c.mp4", codecs("h264", "aac")),
            ("d.mkv", codecs("vp9", "opus")),
        ]));
        let resolver = CompatibilityResolver::new(prober.clone());

        let resolution = resolver
            .resolve(EncodingMode::Copy, &files(&["a.mp4", "b.mp4", "c.mp4", "d.mkv"]))
            .await;
        assert_eq!(resolution.mode, EncodingMode::Copy);
        assert!(!resolution.downgraded);
        // Only the sample is probed.
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_probe_timeout_downgrades_copy_to_web() {
        let prober = Arc::new(FakeProber::new(vec![
            ("a.mp4", codecs("h264", "aac")),
            ("slow.mp4", None),
            ("c.mp4", codecs("h264", "aac")),
        ]));
        let resolver =
            CompatibilityResolver::new(prober).with_timeout(Duration::from_millis(50));

        let resolution = resolver
            .resolve(EncodingMode::Copy, &files(&["a.mp4", "slow.mp4", "c.mp4"]))
            .await;
        assert_eq!(resolution.requested, EncodingMode::Copy);
        assert_eq!(resolution.mode, EncodingMode::Web);
        assert!(resolution.downgraded);
        assert!(resolution.reason.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_incompatible_original_downgrades() {
        let prober = Arc::new(FakeProber::new(vec![("a.webm", codecs("vp9", "opus"))]));
        let resolver = CompatibilityResolver::new(prober);

        let resolution = resolver.resolve(EncodingMode::Original, &files(&["a.webm"])).await;
        assert_eq!(resolution.mode, EncodingMode::Web);
        assert!(resolution.reason.unwrap().contains("vp9"));
    }
}

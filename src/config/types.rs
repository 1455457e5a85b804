use clipcast_av::{SegmentType, TranscodeProfile};
use clipcast_media::CacheBust;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub library: LibraryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible base URL used in playlists
    /// (default: derived from the request's Host header)
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared access token. Streaming routes are open when unset.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Root for live session directories and PID sidecars
    #[serde(default = "default_hls_dir")]
    pub hls_dir: PathBuf,

    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,

    /// Length of the live encoder's rolling playlist
    #[serde(default = "default_list_window")]
    pub list_window_secs: u32,

    #[serde(default)]
    pub segment_type: SegmentType,

    /// Stop live encoders nobody has requested for this long (default: 15 min)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long a live playlist request waits for the first segment
    #[serde(default = "default_live_ready_timeout")]
    pub live_ready_timeout_secs: u64,

    /// How long a segment request waits for a not-yet-written file
    #[serde(default = "default_segment_wait")]
    pub segment_wait_secs: u64,

    /// Window of the cached radio playlist (default: 30 min)
    #[serde(default = "default_cached_window")]
    pub cached_window_secs: u64,

    #[serde(default)]
    pub cache_bust: CacheBust,

    /// Forget clients idle for this long once they hold no connection
    #[serde(default = "default_client_idle")]
    pub client_idle_secs: u64,

    #[serde(default = "default_bandwidth_window")]
    pub bandwidth_window_secs: u64,
}

fn default_hls_dir() -> PathBuf {
    std::env::temp_dir().join("clipcast-hls")
}
fn default_segment_duration() -> u32 {
    6
}
fn default_list_window() -> u32 {
    60
}
fn default_idle_timeout() -> u64 {
    900
}
fn default_sweep_interval() -> u64 {
    15
}
fn default_live_ready_timeout() -> u64 {
    20
}
fn default_segment_wait() -> u64 {
    8
}
fn default_cached_window() -> u64 {
    1800
}
fn default_client_idle() -> u64 {
    30
}
fn default_bandwidth_window() -> u64 {
    15
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            hls_dir: default_hls_dir(),
            segment_duration_secs: default_segment_duration(),
            list_window_secs: default_list_window(),
            segment_type: SegmentType::default(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            live_ready_timeout_secs: default_live_ready_timeout(),
            segment_wait_secs: default_segment_wait(),
            cached_window_secs: default_cached_window(),
            cache_bust: CacheBust::default(),
            client_idle_secs: default_client_idle(),
            bandwidth_window_secs: default_bandwidth_window(),
        }
    }
}

impl StreamingConfig {
    /// Segments kept in the live playlist: window / segment duration, rounded up.
    pub fn list_size(&self) -> u32 {
        let segment = self.segment_duration_secs.max(1);
        self.list_window_secs.div_ceil(segment).max(1)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn live_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.live_ready_timeout_secs)
    }

    pub fn segment_wait(&self) -> Duration {
        Duration::from_secs(self.segment_wait_secs)
    }

    pub fn client_idle(&self) -> Duration {
        Duration::from_secs(self.client_idle_secs)
    }

    pub fn bandwidth_window(&self) -> Duration {
        Duration::from_secs(self.bandwidth_window_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// H.264 profile for the `transcode` encoding mode (default: "main")
    #[serde(default = "default_profile")]
    pub profile: String,

    /// H.264 level for the `transcode` encoding mode (default: "4.0")
    #[serde(default = "default_level")]
    pub level: String,

    /// Per-file ffprobe timeout during compatibility checks
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_profile() -> String {
    "main".to_string()
}
fn default_level() -> String {
    "4.0".to_string()
}
fn default_probe_timeout() -> u64 {
    3
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            level: default_level(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl TranscodeConfig {
    pub fn profile(&self) -> TranscodeProfile {
        TranscodeProfile {
            profile: self.profile.clone(),
            level: self.level.clone(),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// JSON catalog of stream definitions (`{"streams": [...]}`)
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

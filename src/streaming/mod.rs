//! Music-video radio streaming.
//!
//! Two ways to listen to a stream:
//!
//! - **Live**: one ffmpeg process per stream loops the playlist into a
//!   rolling HLS window. Every listener hears the same position.
//! - **Cached**: every track is encoded once into its own HLS cache and the
//!   radio playlist is stitched together per request from the stream's online
//!   time. No long-running encoder is needed.
//!
//! # Routes
//!
//! - `GET /streams/{stream_id}/hls/live.m3u8` - Live rolling playlist
//! - `GET /streams/{stream_id}/hls/{segment}` - Live segment or init section
//! - `GET /streams/{stream_id}/hls/playlist.m3u8` - Cached radio playlist
//! - `POST /streams/{stream_id}/hls/stop` - Stop the live encoder
//! - `POST /streams/{stream_id}/hls/restart` - Restart the live encoder
//! - `GET /streams/{stream_id}/items/{item_id}/stream` - Progressive item playback
//! - `GET /streams/{stream_id}/now-playing` - Current item and offset
//! - `GET /streams/{stream_id}/status` - Session, clients and bandwidth
//! - `GET /tracks/{track_id}/hls/{file}` - File from a track cache

pub mod bandwidth;
pub mod body;
pub mod connections;
pub mod direct;
pub mod files;
pub mod live;
pub mod routes;
pub mod track_cache;

pub use bandwidth::BandwidthMeter;
pub use body::MeteredStream;
pub use connections::{ClientIdentity, ClientSnapshot, ConnectionGuard, ConnectionRegistry};
pub use live::{
    EncoderExit, EncoderLauncher, EncoderProcess, EncoderSpec, FfmpegLauncher, LiveSession,
    LiveSessionManager, LiveSettings, SessionState, SessionStatus,
};

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppContext;

/// Create streaming routes.
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/streams/:stream_id/hls/live.m3u8", get(routes::live_playlist))
        .route("/streams/:stream_id/hls/playlist.m3u8", get(routes::cached_playlist))
        .route("/streams/:stream_id/hls/stop", post(routes::stop_stream))
        .route("/streams/:stream_id/hls/restart", post(routes::restart_stream))
        .route("/streams/:stream_id/hls/:segment", get(routes::live_segment))
        .route("/streams/:stream_id/items/:item_id/stream", get(direct::item_stream))
        .route("/streams/:stream_id/now-playing", get(routes::now_playing_handler))
        .route("/streams/:stream_id/status", get(routes::stream_status))
        .route("/tracks/:track_id/hls/:file", get(routes::track_file))
}

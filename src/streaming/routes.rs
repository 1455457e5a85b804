//! HLS and control endpoints.

use axum::{
    body::Body,
    extract::{ConnectInfo, Extension, Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::Response,
    Json,
};
use chrono::Utc;
use clipcast_common::{
    EncodingMode, Error, ItemId, PlaylistItem, StreamDefinition, StreamId, StreamStatus, TrackId,
};
use clipcast_media::assembler::encode_query_value;
use clipcast_media::{assemble, now_playing, plan_items, rewrite_uris, AssembleOptions, Assembly, CachedTrack};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::bandwidth::BandwidthMeter;
use super::body::MeteredStream;
use super::connections::{ClientIdentity, ClientSnapshot};
use super::files::{self, content_type};
use super::live::{resolve_segment, wait_for_file, wait_ready, SessionStatus};
use super::track_cache;
use crate::jobs::TrackEncodeRequest;
use crate::server::{AccessToken, AppContext, AppError};

pub(crate) const MPEGURL: &str = "application/vnd.apple.mpegurl";

type HandlerResult<T> = std::result::Result<T, AppError>;

pub(crate) fn parse_id<T: std::str::FromStr>(kind: &str, raw: &str) -> Result<T, Error> {
    raw.parse()
        .map_err(|_| Error::invalid(format!("invalid {} id: {}", kind, raw)))
}

pub(crate) async fn load_stream(ctx: &AppContext, raw_id: &str) -> Result<StreamDefinition, Error> {
    let id: StreamId = parse_id("stream", raw_id)?;
    ctx.catalog
        .stream(id)
        .await?
        .ok_or_else(|| Error::not_found("stream", id))
}

/// 404 without playable items, 409 when not broadcasting.
fn require_live(stream: &StreamDefinition) -> Result<(), Error> {
    if !stream.items.iter().any(|i| i.available) {
        return Err(Error::not_found("playable items for stream", stream.id));
    }
    if !stream.is_active() {
        return Err(Error::Conflict(format!("stream {} is not active", stream.id)));
    }
    Ok(())
}

/// Client identity: first `X-Forwarded-For` hop, else the peer address.
pub(crate) fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let ip = forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    ClientIdentity::new(ip, user_agent)
}

/// Absolute base URL for playlist entries.
pub(crate) fn base_url(ctx: &AppContext, headers: &HeaderMap) -> String {
    if let Some(url) = &ctx.config.server.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

fn with_token(url: String, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("{}?token={}", url, encode_query_value(token)),
        None => url,
    }
}

fn token_of(token: &Option<Extension<AccessToken>>) -> Option<String> {
    token.as_ref().and_then(|Extension(AccessToken(t))| t.clone())
}

fn peer_of(connect: &Option<ConnectInfo<SocketAddr>>) -> Option<SocketAddr> {
    connect.as_ref().map(|ConnectInfo(addr)| *addr)
}

fn playlist_response(body: String) -> HandlerResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MPEGURL)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(body))
        .map_err(|e| Error::Internal(e.to_string()).into())
}

/// Stream a file from disk, metering the bytes sent.
pub(crate) async fn file_response(
    path: &FsPath,
    content_type: &str,
    cache_control: &str,
    meter: Option<Arc<BandwidthMeter>>,
) -> HandlerResult<Response> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found("file", path.display()).into())
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();

    let body = Body::from_stream(MeteredStream::new(ReaderStream::new(file), meter));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(header::CACHE_CONTROL, cache_control)
        .body(body)
        .map_err(|e| Error::Internal(e.to_string()).into())
}

/// `GET /streams/:stream_id/hls/live.m3u8`
pub async fn live_playlist(
    State(ctx): State<AppContext>,
    Path(stream_id): Path<String>,
    token: Option<Extension<AccessToken>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> HandlerResult<Response> {
    let stream = load_stream(&ctx, &stream_id).await?;
    require_live(&stream)?;

    let session = ctx.live.ensure_session(&stream)?;
    ctx.connections.register(
        stream.id,
        client_identity(&headers, peer_of(&connect)),
        uri.path(),
        false,
    );

    if !wait_ready(session.dir(), ctx.config.streaming.live_ready_timeout(), 1).await {
        return Err(Error::NotReady(format!("live stream {} is starting", stream.id)).into());
    }

    let raw = tokio::fs::read_to_string(session.dir().join(clipcast_av::PLAYLIST_FILENAME))
        .await
        .map_err(|_| Error::NotReady(format!("live stream {} is restarting", stream.id)))?;

    let token = token_of(&token);
    let prefix = format!("{}/streams/{}/hls", base_url(&ctx, &headers), stream.id);
    let body = rewrite_uris(&raw, |uri| {
        with_token(
            format!("{}/{}", prefix, track_cache::file_name(uri)),
            token.as_deref(),
        )
    });

    ctx.connections.meter(stream.id).record(body.len() as u64);
    playlist_response(body)
}

/// `GET /streams/:stream_id/hls/:segment`
pub async fn live_segment(
    State(ctx): State<AppContext>,
    Path((stream_id, segment)): Path<(String, String)>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> HandlerResult<Response> {
    let id: StreamId = parse_id("stream", &stream_id)?;
    let path = resolve_segment(&ctx.live.settings().session_dir(id), &segment)?;
    let stream = load_stream(&ctx, &stream_id).await?;

    if let Some(session) = ctx.live.get(stream.id) {
        session.touch();
    }
    ctx.connections.register(
        stream.id,
        client_identity(&headers, peer_of(&connect)),
        uri.path(),
        false,
    );

    if !wait_for_file(&path, ctx.config.streaming.segment_wait()).await {
        return Err(Error::not_found("segment", &segment).into());
    }

    let cache_control = if segment.ends_with(".m3u8") {
        "no-store"
    } else {
        "public, max-age=3600"
    };
    file_response(
        &path,
        content_type(&segment),
        cache_control,
        Some(ctx.connections.meter(stream.id)),
    )
    .await
}

fn enqueue_missing(ctx: &AppContext, plan: &[PlaylistItem], missing: &[TrackId], mode: EncodingMode) {
    for track_id in missing {
        let Some(item) = plan.iter().find(|i| i.track_id == *track_id) else {
            continue;
        };
        let queued = ctx.encode_queue.enqueue(TrackEncodeRequest {
            track_id: *track_id,
            file_path: item.file_path.clone(),
            requested: mode,
        });
        if queued {
            tracing::debug!(track_id = %track_id, "Queued encode for uncached track");
        }
    }
}

/// `GET /streams/:stream_id/hls/playlist.m3u8`
pub async fn cached_playlist(
    State(ctx): State<AppContext>,
    Path(stream_id): Path<String>,
    token: Option<Extension<AccessToken>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> HandlerResult<Response> {
    let stream = load_stream(&ctx, &stream_id).await?;
    let items = stream.available_items();
    if items.is_empty() {
        return Err(Error::not_found("playable items for stream", stream.id).into());
    }

    let plan = plan_items(items, stream.shuffle, stream.shuffle_seed());
    let mut tracks = Vec::with_capacity(plan.len());
    for item in &plan {
        tracks.push(CachedTrack {
            track_id: item.track_id,
            entry: track_cache::read(item.track_id, &item.file_path).await,
        });
    }

    ctx.connections.register(
        stream.id,
        client_identity(&headers, peer_of(&connect)),
        uri.path(),
        false,
    );

    let options = AssembleOptions {
        base_url: base_url(&ctx, &headers),
        token: token_of(&token),
        window_secs: ctx.config.streaming.cached_window_secs as f64,
        cache_bust: ctx.config.streaming.cache_bust,
    };

    match assemble(&tracks, stream.elapsed_secs(Utc::now()), &options) {
        Assembly::NotReady { missing } => {
            enqueue_missing(&ctx, &plan, &missing, stream.encoding);
            Err(Error::NotReady(format!(
                "{} tracks of stream {} are being prepared",
                missing.len(),
                stream.id
            ))
            .into())
        }
        Assembly::Ready(playlist) => {
            if !playlist.missing.is_empty() {
                tracing::debug!(
                    stream_id = %stream.id,
                    missing = playlist.missing.len(),
                    "Serving partial cached playlist"
                );
                enqueue_missing(&ctx, &plan, &playlist.missing, stream.encoding);
            }
            ctx.connections.meter(stream.id).record(playlist.body.len() as u64);
            playlist_response(playlist.body)
        }
    }
}

/// `GET /tracks/:track_id/hls/:file`
pub async fn track_file(
    State(ctx): State<AppContext>,
    Path((track_id, file)): Path<(String, String)>,
) -> HandlerResult<Response> {
    let track_id: TrackId = parse_id("track", &track_id)?;
    if !files::is_valid_file_name(&file) {
        return Err(Error::invalid(format!("invalid HLS file name: {}", file)).into());
    }

    let item = ctx
        .catalog
        .find_track(track_id)
        .await?
        .ok_or_else(|| Error::not_found("track", track_id))?;
    let path = track_cache::resolve_file(track_id, &item.file_path, &file)?;

    let cache_control = if file.ends_with(".m3u8") {
        "no-cache"
    } else {
        "public, max-age=31536000"
    };
    file_response(&path, content_type(&file), cache_control, None).await
}

#[derive(Debug, Serialize)]
pub struct NowPlayingResponse {
    pub stream_id: StreamId,
    pub position: usize,
    pub item_id: ItemId,
    pub track_id: TrackId,
    pub artist: Option<String>,
    pub offset_secs: f64,
    pub remaining_secs: f64,
    pub elapsed_secs: f64,
}

/// `GET /streams/:stream_id/now-playing`
pub async fn now_playing_handler(
    State(ctx): State<AppContext>,
    Path(stream_id): Path<String>,
) -> HandlerResult<Json<NowPlayingResponse>> {
    let stream = load_stream(&ctx, &stream_id).await?;
    require_live(&stream)?;
    let elapsed = stream
        .elapsed_secs(Utc::now())
        .ok_or_else(|| Error::Conflict(format!("stream {} has no online time", stream.id)))?;

    let plan = plan_items(stream.available_items(), stream.shuffle, stream.shuffle_seed());
    let mut durations = Vec::with_capacity(plan.len());
    for item in &plan {
        let duration = match item.duration_secs {
            Some(d) => Some(d),
            None => track_cache::read(item.track_id, &item.file_path)
                .await
                .map(|entry| entry.total_duration()),
        };
        durations.push(duration);
    }

    let current = now_playing(&durations, elapsed)
        .ok_or_else(|| Error::NotReady("track durations are not known yet".into()))?;
    let item = &plan[current.index];

    Ok(Json(NowPlayingResponse {
        stream_id: stream.id,
        position: current.index,
        item_id: item.item_id,
        track_id: item.track_id,
        artist: item.artist.clone(),
        offset_secs: current.offset_secs,
        remaining_secs: current.remaining_secs,
        elapsed_secs: elapsed,
    }))
}

#[derive(Debug, Serialize)]
pub struct StreamStatusResponse {
    pub stream_id: StreamId,
    pub name: String,
    pub status: StreamStatus,
    pub encoding: EncodingMode,
    pub items: usize,
    pub available_items: usize,
    pub live: Option<SessionStatus>,
    pub clients: Vec<ClientSnapshot>,
    pub bytes_per_second: f64,
}

/// `GET /streams/:stream_id/status`
pub async fn stream_status(
    State(ctx): State<AppContext>,
    Path(stream_id): Path<String>,
) -> HandlerResult<Json<StreamStatusResponse>> {
    let stream = load_stream(&ctx, &stream_id).await?;

    Ok(Json(StreamStatusResponse {
        stream_id: stream.id,
        name: stream.name.clone(),
        status: stream.status,
        encoding: stream.encoding,
        items: stream.items.len(),
        available_items: stream.items.iter().filter(|i| i.available).count(),
        live: ctx.live.get(stream.id).map(|s| s.status()),
        clients: ctx.connections.list_active(stream.id),
        bytes_per_second: ctx.connections.bytes_per_second(stream.id),
    }))
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stream_id: StreamId,
    pub stopped: bool,
}

/// `POST /streams/:stream_id/hls/stop`
pub async fn stop_stream(
    State(ctx): State<AppContext>,
    Path(stream_id): Path<String>,
) -> HandlerResult<Json<StopResponse>> {
    let id: StreamId = parse_id("stream", &stream_id)?;
    let stopped = ctx.live.stop(id, "requested").await;
    ctx.connections.clear_stream(id);
    Ok(Json(StopResponse {
        stream_id: id,
        stopped,
    }))
}

/// `POST /streams/:stream_id/hls/restart`
pub async fn restart_stream(
    State(ctx): State<AppContext>,
    Path(stream_id): Path<String>,
) -> HandlerResult<Json<SessionStatus>> {
    let stream = load_stream(&ctx, &stream_id).await?;
    require_live(&stream)?;
    let session = ctx.live.restart(&stream).await?;
    Ok(Json(session.status()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_identity_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert(header::USER_AGENT, "AppleCoreMedia/1.0".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let client = client_identity(&headers, Some(peer));
        assert_eq!(client.ip, "203.0.113.7");
        assert_eq!(client.user_agent, "AppleCoreMedia/1.0");

        let client = client_identity(&HeaderMap::new(), Some(peer));
        assert_eq!(client.ip, "127.0.0.1");
        assert_eq!(client.user_agent, "");
    }

    #[test]
    fn test_with_token_encodes_value() {
        assert_eq!(
            with_token("http://h/a.m4s".into(), Some("a b&c")),
            "http://h/a.m4s?token=a%20b%26c"
        );
        assert_eq!(with_token("http://h/a.m4s".into(), None), "http://h/a.m4s");
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        let err = parse_id::<StreamId>("stream", "abc").unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(parse_id::<StreamId>("stream", "12").unwrap(), StreamId::new(12));
    }
}

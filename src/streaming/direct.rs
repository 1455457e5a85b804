//! Progressive playback of a single playlist item.
//!
//! `original` streams serve the source file with HTTP range support. Every
//! other mode pipes an on-the-fly fragmented MP4 from ffmpeg. Either way the
//! client is held as a connection for as long as the body is open.

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::Response,
};
use clipcast_av::{progressive_mp4_args, ToolCommand};
use clipcast_common::{EncodingMode, Error, ItemId, PlaylistItem};
use serde::Deserialize;
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio_util::io::ReaderStream;

use super::bandwidth::BandwidthMeter;
use super::body::MeteredStream;
use super::connections::ConnectionGuard;
use super::routes::{client_identity, load_stream, parse_id};
use crate::server::{AppContext, AppError};

type HandlerResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Default, Deserialize)]
pub struct ItemStreamQuery {
    /// Start offset in seconds for transcoded output.
    pub start: Option<f64>,
}

/// An inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a single-range `Range` header against a file of `file_size` bytes.
///
/// Supports `bytes=0-499`, `bytes=500-` and `bytes=-500`. Unsatisfiable or
/// malformed ranges yield `None` and the whole file is served.
pub fn parse_range_header(header: &str, file_size: u64) -> Option<ByteRange> {
    if file_size == 0 {
        return None;
    }
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    let last = file_size - 1;

    let range = match (start.is_empty(), end.is_empty()) {
        (true, false) => {
            let suffix: u64 = end.parse().ok()?;
            if suffix == 0 {
                return None;
            }
            ByteRange {
                start: file_size.saturating_sub(suffix),
                end: last,
            }
        }
        (false, true) => ByteRange {
            start: start.parse().ok()?,
            end: last,
        },
        (false, false) => ByteRange {
            start: start.parse().ok()?,
            end: end.parse::<u64>().ok()?.min(last),
        },
        (true, true) => return None,
    };

    (range.start <= range.end && range.start < file_size).then_some(range)
}

/// Content type of a source file by extension.
fn source_content_type(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ts" | "m2ts" => "video/mp2t",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// `GET /streams/:stream_id/items/:item_id/stream`
pub async fn item_stream(
    State(ctx): State<AppContext>,
    Path((stream_id, item_id)): Path<(String, String)>,
    Query(query): Query<ItemStreamQuery>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> HandlerResult<Response> {
    let stream = load_stream(&ctx, &stream_id).await?;
    let item_id: ItemId = parse_id("item", &item_id)?;
    let item = stream
        .items
        .iter()
        .find(|i| i.item_id == item_id && i.available)
        .cloned()
        .ok_or_else(|| Error::not_found("item", item_id))?;

    if !tokio::fs::try_exists(&item.file_path).await.unwrap_or(false) {
        return Err(Error::not_found("media file", item.file_path.display()).into());
    }

    let peer = connect.map(|ConnectInfo(addr)| addr);
    let guard = ctx.connections.register(
        stream.id,
        client_identity(&headers, peer),
        uri.path(),
        true,
    );
    let meter = ctx.connections.meter(stream.id);

    match stream.encoding {
        EncodingMode::Original => serve_source(&item, &headers, meter, guard).await,
        mode => serve_encoded(&ctx, &item, mode, query.start, meter, guard).await,
    }
}

async fn serve_source(
    item: &PlaylistItem,
    headers: &HeaderMap,
    meter: Arc<BandwidthMeter>,
    guard: Option<ConnectionGuard>,
) -> HandlerResult<Response> {
    let mut file = File::open(&item.file_path).await?;
    let file_size = file.metadata().await?.len();
    let content_type = source_content_type(&item.file_path);

    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| parse_range_header(s, file_size));

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");

    let (builder, body) = match range {
        Some(range) => {
            file.seek(SeekFrom::Start(range.start)).await?;
            let stream = MeteredStream::new(ReaderStream::new(file.take(range.len())), Some(meter))
                .with_guard(guard);
            (
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_LENGTH, range.len().to_string())
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", range.start, range.end, file_size),
                    ),
                Body::from_stream(stream),
            )
        }
        None => {
            let stream = MeteredStream::new(ReaderStream::new(file), Some(meter)).with_guard(guard);
            (
                builder
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, file_size.to_string()),
                Body::from_stream(stream),
            )
        }
    };

    builder
        .body(body)
        .map_err(|e| Error::Internal(e.to_string()).into())
}

async fn serve_encoded(
    ctx: &AppContext,
    item: &PlaylistItem,
    mode: EncodingMode,
    start: Option<f64>,
    meter: Arc<BandwidthMeter>,
    guard: Option<ConnectionGuard>,
) -> HandlerResult<Response> {
    let resolution = ctx
        .resolver
        .resolve(mode, std::slice::from_ref(&item.file_path))
        .await;
    if resolution.downgraded {
        tracing::info!(
            item_id = %item.item_id,
            reason = resolution.reason.as_deref().unwrap_or("unknown"),
            "Item cannot be stream-copied, encoding for web"
        );
    }

    let mut cmd = ToolCommand::new(ctx.tools.ffmpeg.clone());
    cmd.args(progressive_mp4_args(
        &item.file_path,
        resolution.mode,
        &ctx.config.transcode.profile(),
        start,
    ));
    let mut child = cmd.spawn_piped().map_err(clipcast_common::Error::from)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("encoder stdout was not captured".into()))?;
    if let Some(stderr) = child.stderr.take() {
        let item_id = item.item_id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(item_id = %item_id, "ffmpeg: {}", line);
            }
        });
    }

    tracing::debug!(item_id = %item.item_id, mode = %resolution.mode, "Streaming encoded item");

    let stream = MeteredStream::new(ReaderStream::new(stdout), Some(meter))
        .with_guard(guard)
        .with_child(child);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(e.to_string()).into())
}

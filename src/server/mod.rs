use crate::catalog::{Catalog, MemoryCatalog};
use crate::config::Config;
use crate::jobs::{EncodeQueue, FfmpegTrackEncoder, LocalEncodeQueue};
use crate::streaming::{
    self, ConnectionRegistry, FfmpegLauncher, LiveSessionManager, LiveSettings,
};
use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clipcast_av::{
    CompatibilityResolver, FfprobeProber, ProcessInspector, SystemProcessInspector, ToolPaths,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod error;

pub use auth::{AccessToken, StaticTokenValidator, TokenValidator};
pub use error::AppError;

/// Requests an encode queue holds before rejecting new ones.
const ENCODE_QUEUE_CAPACITY: usize = 256;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub catalog: Arc<dyn Catalog>,
    pub tokens: Arc<dyn TokenValidator>,
    /// Receives track cache misses from the cached playlist route
    pub encode_queue: Arc<dyn EncodeQueue>,
    pub live: LiveSessionManager,
    pub connections: ConnectionRegistry,
    pub resolver: CompatibilityResolver,
    pub tools: ToolPaths,
}

impl AppContext {
    /// Build a context; token validation and client tracking follow `config`.
    pub fn new(
        config: Config,
        catalog: Arc<dyn Catalog>,
        encode_queue: Arc<dyn EncodeQueue>,
        live: LiveSessionManager,
        resolver: CompatibilityResolver,
        tools: ToolPaths,
    ) -> Self {
        let connections = ConnectionRegistry::new(
            config.streaming.client_idle(),
            config.streaming.bandwidth_window(),
        );
        Self {
            tokens: Arc::new(StaticTokenValidator::new(config.auth.token.clone())),
            config: Arc::new(config),
            catalog,
            encode_queue,
            live,
            connections,
            resolver,
            tools,
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("live", &self.live)
            .field("connections", &self.connections)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::RANGE,
            HeaderName::from_static(auth::TOKEN_HEADER),
        ]);

    let protected = streaming::routes().layer(middleware::from_fn_with_state(
        ctx.clone(),
        auth::token_auth_middleware,
    ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the production context: real tools, catalog file, local encode queue.
pub async fn build_context(config: Config) -> Result<AppContext> {
    let tools = ToolPaths::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );

    let probe_timeout = config.transcode.probe_timeout();
    let resolver = CompatibilityResolver::new(Arc::new(FfprobeProber::new(
        tools.ffprobe.clone(),
        probe_timeout,
    )))
    .with_timeout(probe_timeout);

    let catalog = match &config.library.catalog_path {
        Some(path) if path.exists() => MemoryCatalog::load(path)
            .await
            .with_context(|| format!("Failed to load catalog {:?}", path))?,
        Some(path) => {
            tracing::warn!("Catalog file {:?} not found, starting with no streams", path);
            MemoryCatalog::default()
        }
        None => {
            tracing::warn!("No catalog configured, starting with no streams");
            MemoryCatalog::default()
        }
    };

    tokio::fs::create_dir_all(&config.streaming.hls_dir)
        .await
        .with_context(|| format!("Failed to create HLS directory {:?}", config.streaming.hls_dir))?;

    let inspector: Arc<dyn ProcessInspector> = Arc::new(SystemProcessInspector);
    let live = LiveSessionManager::new(
        LiveSettings::from_config(&config.streaming, &config.transcode, &tools),
        Arc::new(FfmpegLauncher::new(tools.ffmpeg.clone())),
        resolver.clone(),
        inspector,
    );

    let encoder = FfmpegTrackEncoder::new(tools.ffmpeg.clone(), resolver.clone())
        .with_profile(config.transcode.profile())
        .with_segments(
            config.streaming.segment_duration_secs,
            config.streaming.segment_type,
        );
    let (queue, _worker) = LocalEncodeQueue::start(Arc::new(encoder), ENCODE_QUEUE_CAPACITY);

    Ok(AppContext::new(
        config,
        Arc::new(catalog),
        Arc::new(queue),
        live,
        resolver,
        tools,
    ))
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let ctx = build_context(config).await?;
    if !ctx.tokens.is_enabled() {
        tracing::warn!("No access token configured, streaming routes are open");
    }

    let sweeper = ctx.live.spawn_idle_sweeper();
    let live = ctx.live.clone();
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    live.stop_all("shutdown").await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

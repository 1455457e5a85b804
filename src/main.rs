mod cli;

use clipcast::{
    catalog::{Catalog, MemoryCatalog},
    config, server,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use clipcast_av::{check_codecs, probe_codecs, ToolPaths};
use clipcast_common::StreamId;
use clipcast_media::plan_items;

async fn start_server(host: String, port: u16, config_path: Option<&std::path::Path>) -> Result<()> {
    // Load config
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting clipcast server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Live session directory: {}", config.streaming.hls_dir.display());

    let result = server::start_server(config).await;
    tracing::info!("Shutting down...");
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipcast=trace,clipcast_media=trace,clipcast_av=trace,clipcast_common=debug,tower_http=debug".to_string()
        } else {
            "clipcast=debug,clipcast_media=debug,clipcast_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::Plan { stream_id } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(print_plan(StreamId::new(stream_id), cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("clipcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn tool_paths(config: &config::Config) -> ToolPaths {
    ToolPaths::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    )
}

async fn probe_file(
    file: &std::path::Path,
    json: bool,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = tool_paths(&config);
    let info = probe_codecs(&tools.ffprobe, file, config.transcode.probe_timeout())
        .await
        .with_context(|| format!("Failed to probe {:?}", file))?;
    let compatible = check_codecs(&info);

    if json {
        let value = serde_json::json!({
            "file": file,
            "codecs": info,
            "stream_copy_compatible": compatible.is_ok(),
            "reason": compatible.as_ref().err(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", info.container.as_deref().unwrap_or("unknown"));
    println!("Video: {}", info.video_codec.as_deref().unwrap_or("none"));
    println!("Audio: {}", info.audio_codec.as_deref().unwrap_or("none"));
    if let Some(duration) = info.duration_secs {
        let secs = duration as u64;
        println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    }
    match compatible {
        Ok(()) => println!("✓ Can be stream-copied into HLS"),
        Err(reason) => println!("✗ Needs re-encoding: {}", reason),
    }

    Ok(())
}

async fn print_plan(stream_id: StreamId, config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let path = config
        .library
        .catalog_path
        .as_deref()
        .context("No catalog configured (library.catalog_path)")?;
    let catalog = MemoryCatalog::load(path).await?;
    let stream = catalog
        .stream(stream_id)
        .await?
        .with_context(|| format!("Stream {} not found", stream_id))?;

    println!(
        "Stream {} \"{}\" ({}, {}, shuffle {})",
        stream.id,
        stream.name,
        stream.status,
        stream.encoding,
        if stream.shuffle { "on" } else { "off" }
    );

    let plan = plan_items(stream.available_items(), stream.shuffle, stream.shuffle_seed());
    if plan.is_empty() {
        println!("No playable items.");
        return Ok(());
    }
    for (i, item) in plan.iter().enumerate() {
        print!(
            "  {:>3}. item {} track {} - {}",
            i + 1,
            item.item_id,
            item.track_id,
            item.artist.as_deref().unwrap_or("unknown artist")
        );
        if let Some(duration) = item.duration_secs {
            print!(" ({:.1}s)", duration);
        }
        println!();
        println!("       {}", item.file_path.display());
    }

    Ok(())
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = clipcast_av::check_tools(&tool_paths(&config));
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Live and cached streaming need both.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Auth enabled: {}", config.auth.token.is_some());
            println!("  HLS dir: {}", config.streaming.hls_dir.display());
            println!(
                "  Segments: {}s x {} ({:?})",
                config.streaming.segment_duration_secs,
                config.streaming.list_size(),
                config.streaming.segment_type
            );
            println!(
                "  Catalog: {}",
                config
                    .library
                    .catalog_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}

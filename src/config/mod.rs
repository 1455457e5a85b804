mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./clipcast.toml",
        "~/.config/clipcast/config.toml",
        "/etc/clipcast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

fn expand_paths(config: &mut Config) {
    config.streaming.hls_dir = expand(&config.streaming.hls_dir);
    if let Some(path) = config.library.catalog_path.as_mut() {
        *path = expand(path);
    }
    if let Some(path) = config.tools.ffmpeg_path.as_mut() {
        *path = expand(path);
    }
    if let Some(path) = config.tools.ffprobe_path.as_mut() {
        *path = expand(path);
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    // Validate server config
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let streaming = &config.streaming;
    if streaming.segment_duration_secs == 0 {
        anyhow::bail!("streaming.segment_duration_secs must be greater than 0");
    }
    if streaming.list_window_secs < streaming.segment_duration_secs {
        anyhow::bail!(
            "streaming.list_window_secs ({}) is shorter than one segment ({}s)",
            streaming.list_window_secs,
            streaming.segment_duration_secs
        );
    }
    if streaming.cached_window_secs < u64::from(streaming.segment_duration_secs) {
        anyhow::bail!(
            "streaming.cached_window_secs ({}) is shorter than one segment ({}s)",
            streaming.cached_window_secs,
            streaming.segment_duration_secs
        );
    }

    if let Some(token) = &config.auth.token {
        if token.trim().is_empty() {
            anyhow::bail!("auth.token is set but empty");
        }
    }

    if let Some(path) = &config.library.catalog_path {
        if !path.exists() {
            tracing::warn!("Catalog file does not exist: {:?}", path);
        }
    }

    Ok(())
}

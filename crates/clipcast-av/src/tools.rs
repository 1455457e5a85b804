//! External tool detection and management.

use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available and get its information.
///
/// ffmpeg-family tools take `-version` rather than `--version`.
///
/// # Example
///
/// ```no_run
/// use clipcast_av::check_tool;
///
/// let info = check_tool("ffprobe", None);
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: &str, configured: Option<&Path>) -> ToolInfo {
    let program = match get_tool_path(name, configured) {
        Ok(path) => path,
        Err(_) => {
            return ToolInfo {
                name: name.to_string(),
                available: false,
                version: None,
                path: None,
            }
        }
    };

    let version_arg = if name.starts_with("ff") {
        "-version"
    } else {
        "--version"
    };

    match Command::new(&program).arg(version_arg).output() {
        Ok(output) if output.status.success() => ToolInfo {
            name: name.to_string(),
            available: true,
            version: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string()),
            path: Some(program),
        },
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: Some(program),
        },
    }
}

/// Check ffmpeg and ffprobe.
pub fn check_tools(paths: &ToolPaths) -> Vec<ToolInfo> {
    vec![
        check_tool("ffmpeg", Some(&paths.ffmpeg)),
        check_tool("ffprobe", Some(&paths.ffprobe)),
    ]
}

/// Require that a tool is available, returning its path.
///
/// # Errors
///
/// Returns an error if the tool is not found.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool_not_found(name))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Ok(found) = which::which(path) {
            return Ok(found);
        }
    }

    require_tool(name)
}

/// Resolved locations of the encoder and prober.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    /// Resolve both tools, falling back to the bare program name when a tool
    /// cannot be found so that failures surface when the tool is first used.
    pub fn discover(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Self {
        Self {
            ffmpeg: get_tool_path("ffmpeg", ffmpeg).unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            ffprobe: get_tool_path("ffprobe", ffprobe)
                .unwrap_or_else(|_| PathBuf::from("ffprobe")),
        }
    }

    /// File name of the encoder binary, used to recognise orphaned encoders.
    pub fn ffmpeg_name(&self) -> String {
        self.ffmpeg
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ffmpeg".to_string())
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

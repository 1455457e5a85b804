//! PID sidecar written next to each live session directory, used to find
//! encoders left behind by a previous process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::streaming::files;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub dir: PathBuf,
    pub updated_at: DateTime<Utc>,
}

impl PidRecord {
    pub fn new(pid: u32, dir: &Path) -> Self {
        Self {
            pid,
            dir: dir.to_path_buf(),
            updated_at: Utc::now(),
        }
    }
}

pub async fn write(path: &Path, record: &PidRecord) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(record)?).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Read a sidecar; unreadable or malformed files count as absent.
pub async fn read(path: &Path) -> Option<PidRecord> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring malformed PID sidecar: {}", e);
            None
        }
    }
}

pub async fn remove(path: &Path) -> std::io::Result<()> {
    files::remove_file_if_exists(path).await
}

//! Stream catalog.
//!
//! The catalog of streams and their playlists is owned elsewhere (library
//! management, downloads, metadata). The streaming engine only reads it
//! through [`Catalog`]. The binary ships [`MemoryCatalog`], loaded from a JSON
//! document at startup.

use async_trait::async_trait;
use clipcast_common::{Error, PlaylistItem, Result, StreamDefinition, StreamId, TrackId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Read access to stream definitions.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn stream(&self, id: StreamId) -> Result<Option<StreamDefinition>>;

    async fn streams(&self) -> Result<Vec<StreamDefinition>>;

    /// Any playlist item backed by `track_id`, used to locate its source file.
    async fn find_track(&self, track_id: TrackId) -> Result<Option<PlaylistItem>>;
}

/// On-disk catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub streams: Vec<StreamDefinition>,
}

/// In-memory [`Catalog`].
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    streams: RwLock<BTreeMap<StreamId, StreamDefinition>>,
}

impl MemoryCatalog {
    pub fn new(streams: Vec<StreamDefinition>) -> Self {
        let catalog = Self::default();
        for stream in streams {
            catalog.upsert(stream);
        }
        catalog
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)
            .map_err(|e| Error::invalid(format!("invalid catalog: {}", e)))?;
        Ok(Self::new(file.streams))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            streams = catalog.len(),
            "Loaded stream catalog"
        );
        Ok(catalog)
    }

    /// Insert or replace a stream definition.
    pub fn upsert(&self, stream: StreamDefinition) {
        self.streams.write().insert(stream.id, stream);
    }

    pub fn remove(&self, id: StreamId) -> Option<StreamDefinition> {
        self.streams.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn stream(&self, id: StreamId) -> Result<Option<StreamDefinition>> {
        Ok(self.streams.read().get(&id).cloned())
    }

    async fn streams(&self) -> Result<Vec<StreamDefinition>> {
        Ok(self.streams.read().values().cloned().collect())
    }

    async fn find_track(&self, track_id: TrackId) -> Result<Option<PlaylistItem>> {
        Ok(self
            .streams
            .read()
            .values()
            .flat_map(|s| s.items.iter())
            .find(|item| item.track_id == track_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipcast_common::{EncodingMode, StreamStatus};

    const CATALOG: &str = r#"{
        "streams": [
            {
                "id": 1,
                "name": "Eighties",
                "status": "active",
                "shuffle": true,
                "encoding": "copy",
                "online_since": "2024-05-01T12:00:00Z",
                "items": [
                    {"position": 0, "item_id": 10, "track_id": 100, "file_path": "/media/a.mp4", "artist": "A-ha"},
                    {"position": 1, "item_id": 11, "track_id": 101, "file_path": "/media/b.mp4", "available": false}
                ]
            },
            {"id": 2, "name": "Empty"}
        ]
    }"#;

    #[tokio::test]
    async fn test_load_from_json() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);

        let stream = catalog.stream(StreamId::new(1)).await.unwrap().unwrap();
        assert_eq!(stream.status, StreamStatus::Active);
        assert_eq!(stream.encoding, EncodingMode::Copy);
        assert_eq!(stream.available_items().len(), 1);

        let empty = catalog.stream(StreamId::new(2)).await.unwrap().unwrap();
        assert_eq!(empty.status, StreamStatus::Stopped);
        assert_eq!(empty.encoding, EncodingMode::Web);

        assert!(catalog.stream(StreamId::new(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_track() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        let item = catalog.find_track(TrackId::new(101)).await.unwrap().unwrap();
        assert_eq!(item.item_id.get(), 11);
        assert!(catalog.find_track(TrackId::new(999)).await.unwrap().is_none());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = MemoryCatalog::from_json("{\"streams\": 5}").unwrap_err();
        assert_eq!(err.http_status(), 400);
    }
}

//! Per-stream client tracking.
//!
//! Clients are identified by IP + user agent. Playlist and segment requests
//! touch a record; long-lived bodies (progressive item streams) additionally
//! hold it through a [`ConnectionGuard`] so the client stays listed while the
//! body is open.

use chrono::{DateTime, Utc};
use clipcast_common::StreamId;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bandwidth::BandwidthMeter;

/// Who is connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClientIdentity {
    pub ip: String,
    pub user_agent: String,
}

impl ClientIdentity {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ClientRecord {
    connected_at: DateTime<Utc>,
    last_seen: Instant,
    last_seen_at: DateTime<Utc>,
    last_path: String,
    held: usize,
}

/// Snapshot of a client for status output.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    #[serde(flatten)]
    pub client: ClientIdentity,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_path: String,
    /// Open long-lived connections.
    pub held: usize,
    #[serde(skip)]
    idle: Duration,
}

type RecordKey = (StreamId, ClientIdentity);

struct Inner {
    records: DashMap<RecordKey, ClientRecord>,
    meters: DashMap<StreamId, Arc<BandwidthMeter>>,
    idle_timeout: Duration,
    bandwidth_window: Duration,
}

/// Registry of clients per stream, plus per-stream bandwidth meters.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(idle_timeout: Duration, bandwidth_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: DashMap::new(),
                meters: DashMap::new(),
                idle_timeout,
                bandwidth_window,
            }),
        }
    }

    /// Record a request. Persistent registrations return a guard that keeps
    /// the client held until dropped.
    pub fn register(
        &self,
        stream_id: StreamId,
        client: ClientIdentity,
        path: &str,
        persistent: bool,
    ) -> Option<ConnectionGuard> {
        self.register_at(stream_id, client, path, persistent, Instant::now())
    }

    pub fn register_at(
        &self,
        stream_id: StreamId,
        client: ClientIdentity,
        path: &str,
        persistent: bool,
        now: Instant,
    ) -> Option<ConnectionGuard> {
        let key = (stream_id, client);
        let wall = Utc::now();

        {
            let mut record = self
                .inner
                .records
                .entry(key.clone())
                .or_insert_with(|| ClientRecord {
                    connected_at: wall,
                    last_seen: now,
                    last_seen_at: wall,
                    last_path: String::new(),
                    held: 0,
                });
            record.last_seen = now;
            record.last_seen_at = wall;
            record.last_path = path.to_string();
            if persistent {
                record.held += 1;
            }
        }

        if persistent {
            tracing::debug!(stream_id = %key.0, client_ip = %key.1.ip, path, "Client connection opened");
            Some(ConnectionGuard {
                inner: Arc::clone(&self.inner),
                key: Some(key),
            })
        } else {
            None
        }
    }

    /// Active clients of a stream, most recently seen first.
    pub fn list_active(&self, stream_id: StreamId) -> Vec<ClientSnapshot> {
        self.list_active_at(stream_id, Instant::now())
    }

    /// Like [`ConnectionRegistry::list_active`], evicting relative to `now`.
    ///
    /// Idle records of every stream are evicted, not just `stream_id`'s.
    pub fn list_active_at(&self, stream_id: StreamId, now: Instant) -> Vec<ClientSnapshot> {
        let timeout = self.inner.idle_timeout;
        self.inner.records.retain(|_, record| {
            record.held > 0 || now.saturating_duration_since(record.last_seen) <= timeout
        });

        let mut active: Vec<ClientSnapshot> = self
            .inner
            .records
            .iter()
            .filter(|entry| entry.key().0 == stream_id)
            .map(|entry| {
                let record = entry.value();
                ClientSnapshot {
                    client: entry.key().1.clone(),
                    connected_at: record.connected_at,
                    last_seen: record.last_seen_at,
                    last_path: record.last_path.clone(),
                    held: record.held,
                    idle: now.saturating_duration_since(record.last_seen),
                }
            })
            .collect();

        active.sort_by(|a, b| a.idle.cmp(&b.idle));
        active
    }

    /// Forget every client of a stream (used when a stream is stopped).
    pub fn clear_stream(&self, stream_id: StreamId) {
        self.inner.records.retain(|(id, _), record| *id != stream_id || record.held > 0);
        self.inner.meters.remove(&stream_id);
    }

    /// Bandwidth meter for a stream, created on first use.
    pub fn meter(&self, stream_id: StreamId) -> Arc<BandwidthMeter> {
        self.inner
            .meters
            .entry(stream_id)
            .or_insert_with(|| Arc::new(BandwidthMeter::new(self.inner.bandwidth_window)))
            .clone()
    }

    /// Current bytes per second served for a stream.
    pub fn bytes_per_second(&self, stream_id: StreamId) -> f64 {
        self.inner
            .meters
            .get(&stream_id)
            .map(|m| m.rate())
            .unwrap_or(0.0)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("records", &self.inner.records.len())
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish()
    }
}

/// Held connection; dropping it closes the connection.
pub struct ConnectionGuard {
    inner: Arc<Inner>,
    key: Option<RecordKey>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(mut record) = self.inner.records.get_mut(&key) {
            record.held = record.held.saturating_sub(1);
            record.last_seen = Instant::now();
            record.last_seen_at = Utc::now();
        }
        tracing::debug!(stream_id = %key.0, client_ip = %key.1.ip, "Client connection closed");
    }
}

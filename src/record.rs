//! Persisted record shapes.
//!
//! These are the exact value types the [`EventStore`](crate::store::EventStore)
//! contract trades in. Event records are append-only; the mutable records
//! (snapshots, read indexes, leases) are immutable values replaced through
//! versioned compare-and-swap, never updated in place.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds, the timestamp unit of every record.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Deterministic record id for an aggregate version.
///
/// Two writers racing to claim the same version produce the same id, so a
/// duplicate-id append failure is the concurrency-conflict signal.
pub fn record_id(aggregate_id: &str, version: i64) -> String {
    format!("{aggregate_id}-{version}")
}

/// A durably appended event. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// `"{aggregate_id}-{version}"`; uniqueness enforces first-writer-wins.
    pub id: String,
    pub aggregate_id: String,
    /// Strictly increasing from 1 per aggregate; assigned at append time.
    pub aggregate_version: i64,
    /// Wire discriminator resolved through the aggregate registry.
    pub event_title: String,
    /// Serialized event payload, opaque to the store.
    pub payload: String,
    /// Epoch milliseconds at append time.
    pub created_at: i64,
}

impl EventRecord {
    pub fn new(
        aggregate_id: impl Into<String>,
        version: i64,
        event_title: impl Into<String>,
        payload: String,
    ) -> Self {
        let aggregate_id = aggregate_id.into();
        Self {
            id: record_id(&aggregate_id, version),
            aggregate_id,
            aggregate_version: version,
            event_title: event_title.into(),
            payload,
            created_at: now_millis(),
        }
    }
}

/// Cached materialization of aggregate state at a version.
///
/// A pure performance cache: replaced via monotonic CAS, never authoritative,
/// and always at or behind the latest stored event version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate id.
    pub id: String,
    /// Serialized aggregate state.
    pub snapshot: String,
    /// Version of the last event folded into this state.
    pub version: i64,
}

/// Durable checkpoint of how far a named stream has been processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStreamReadIndex {
    /// The stream name.
    pub id: String,
    /// Commit position of the last processed record.
    pub read_index: i64,
    /// Bumped by exactly one on every successful commit.
    pub version: i64,
}

/// Lease record electing the single active reader of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEventStreamReader {
    /// The stream name.
    pub id: String,
    /// Bumped by one on every successful takeover.
    pub version: i64,
    /// Identity of the holding process.
    pub reader_id: String,
    /// Last position the holder reported; carried over on takeover so a new
    /// holder continues rather than restarts.
    pub read_position: i64,
    /// Epoch milliseconds of the holder's last heartbeat.
    pub last_interaction: i64,
}

impl ActiveEventStreamReader {
    /// Build a takeover candidate from the previously observed lease.
    pub fn candidate(stream_name: &str, reader_id: &str, observed: Option<&Self>) -> Self {
        Self {
            id: stream_name.to_string(),
            version: observed.map(|l| l.version).unwrap_or(0) + 1,
            reader_id: reader_id.to_string(),
            read_position: observed.map(|l| l.read_position).unwrap_or(0),
            last_interaction: now_millis(),
        }
    }

    /// Refreshed copy of a held lease. Keeps the version: only takeovers
    /// advance it.
    pub fn refreshed(&self, read_position: i64) -> Self {
        Self {
            read_position,
            last_interaction: now_millis(),
            ..self.clone()
        }
    }
}

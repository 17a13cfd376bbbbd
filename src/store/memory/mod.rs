//! In-memory reference implementation of the store contract.
//!
//! Backs the integration tests and standalone use. Holds everything in maps
//! behind one async mutex; commit positions are a per-table counter assigned
//! at append, so batch reads observe records in commit order.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::record::{ActiveEventStreamReader, EventRecord, EventStreamReadIndex, Snapshot};

use super::{CommittedRecord, EventStore, Result, StoreError};

#[derive(Default)]
struct Table {
    /// Commit position -> record, ascending iteration order.
    log: BTreeMap<i64, EventRecord>,
    /// Record ids, for duplicate-version detection.
    ids: HashSet<String>,
    snapshots: HashMap<String, Snapshot>,
    next_position: i64,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    read_indexes: HashMap<String, EventStreamReadIndex>,
    active_readers: HashMap<String, ActiveEventStreamReader>,
}

/// In-memory event store.
#[derive(Default)]
pub struct MemoryEventStore {
    state: Mutex<State>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append_event(&self, table: &str, record: EventRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let table = state.tables.entry(table.to_string()).or_default();
        if table.ids.contains(&record.id) {
            return Err(StoreError::DuplicateVersion {
                id: record.id.clone(),
            });
        }
        table.next_position += 1;
        let position = table.next_position;
        table.ids.insert(record.id.clone());
        table.log.insert(position, record);
        Ok(())
    }

    async fn read_events_after_version(
        &self,
        table: &str,
        aggregate_id: &str,
        version: i64,
    ) -> Result<Vec<EventRecord>> {
        let state = self.state.lock().await;
        let Some(table) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        let mut events: Vec<EventRecord> = table
            .log
            .values()
            .filter(|r| r.aggregate_id == aggregate_id && r.aggregate_version > version)
            .cloned()
            .collect();
        events.sort_by_key(|r| r.aggregate_version);
        Ok(events)
    }

    async fn read_batch_after_position(
        &self,
        table: &str,
        position: i64,
        limit: usize,
    ) -> Result<Vec<CommittedRecord>> {
        let state = self.state.lock().await;
        let Some(table) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(table
            .log
            .range(position + 1..)
            .take(limit)
            .map(|(position, record)| CommittedRecord {
                position: *position,
                record: record.clone(),
            })
            .collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.tables.contains_key(table))
    }

    async fn snapshot(&self, table: &str, aggregate_id: &str) -> Result<Option<Snapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.snapshots.get(aggregate_id))
            .cloned())
    }

    async fn put_snapshot_if_newer(&self, table: &str, snapshot: Snapshot) -> Result<bool> {
        let mut state = self.state.lock().await;
        let table = state.tables.entry(table.to_string()).or_default();
        match table.snapshots.get(&snapshot.id) {
            Some(existing) if existing.version >= snapshot.version => Ok(false),
            _ => {
                table.snapshots.insert(snapshot.id.clone(), snapshot);
                Ok(true)
            }
        }
    }

    async fn read_index(&self, stream_name: &str) -> Result<Option<EventStreamReadIndex>> {
        let state = self.state.lock().await;
        Ok(state.read_indexes.get(stream_name).cloned())
    }

    async fn commit_read_index_if_newer(&self, index: EventStreamReadIndex) -> Result<bool> {
        let mut state = self.state.lock().await;
        let stored_version = state.read_indexes.get(&index.id).map(|i| i.version);
        let expected = stored_version.unwrap_or(0) + 1;
        if index.version != expected {
            return Ok(false);
        }
        state.read_indexes.insert(index.id.clone(), index);
        Ok(true)
    }

    async fn active_reader(&self, stream_name: &str) -> Result<Option<ActiveEventStreamReader>> {
        let state = self.state.lock().await;
        Ok(state.active_readers.get(stream_name).cloned())
    }

    async fn try_claim_active_reader(
        &self,
        expected_version: Option<i64>,
        candidate: ActiveEventStreamReader,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let stored = state.active_readers.get(&candidate.id).map(|l| l.version);
        if stored != expected_version {
            return Ok(false);
        }
        state.active_readers.insert(candidate.id.clone(), candidate);
        Ok(true)
    }
}

//! Event storage interface.
//!
//! The engine talks to durable storage only through [`EventStore`]. All
//! cross-process coordination (snapshot writes, checkpoint commits,
//! leadership claims) is expressed as optimistic versioned compare-and-swap
//! on this contract, so no in-process locks are needed across writers.

use async_trait::async_trait;

use crate::record::{ActiveEventStreamReader, EventRecord, EventStreamReadIndex, Snapshot};

pub mod memory;

pub use memory::MemoryEventStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record with this id already exists: a concurrent writer claimed the
    /// version first. Expected and routine; drives the write retry loop.
    #[error("duplicate version: record '{id}' already exists")]
    DuplicateVersion { id: String },

    /// The backend cannot be reached. Callers back off and retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An event record together with the commit position the store assigned it.
///
/// Positions are what stream readers checkpoint; they are store-assigned,
/// strictly ascending per table, and opaque beyond ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedRecord {
    pub position: i64,
    pub record: EventRecord,
}

/// Interface for event persistence.
///
/// Every operation must be safe under concurrent callers targeting the same
/// aggregate id or stream name. The reference implementation is
/// [`MemoryEventStore`]; durable backends implement the same contract.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event record to a table.
    ///
    /// Fails with [`StoreError::DuplicateVersion`] when a record with the
    /// same id already exists. This is the sole concurrency-conflict
    /// signal: the first writer to claim a version wins.
    async fn append_event(&self, table: &str, record: EventRecord) -> Result<()>;

    /// All records of one aggregate with version strictly greater than
    /// `version`, ascending by version.
    async fn read_events_after_version(
        &self,
        table: &str,
        aggregate_id: &str,
        version: i64,
    ) -> Result<Vec<EventRecord>>;

    /// Up to `limit` records with commit position strictly greater than
    /// `position`, ascending by position.
    async fn read_batch_after_position(
        &self,
        table: &str,
        position: i64,
        limit: usize,
    ) -> Result<Vec<CommittedRecord>>;

    /// Whether the backing table has been created yet. Readers wait on this
    /// before their first poll; tables are created lazily on first append.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Latest snapshot for an aggregate, if any.
    async fn snapshot(&self, table: &str, aggregate_id: &str) -> Result<Option<Snapshot>>;

    /// Store a snapshot if it strictly increases the stored version.
    /// Returns whether the write applied.
    async fn put_snapshot_if_newer(&self, table: &str, snapshot: Snapshot) -> Result<bool>;

    /// Durable checkpoint for a stream, if any.
    async fn read_index(&self, stream_name: &str) -> Result<Option<EventStreamReadIndex>>;

    /// Commit a checkpoint. Applies only when `index.version` is exactly one
    /// greater than the stored version (or 1 when none is stored). The read
    /// index itself may move backward: operator-triggered replays do.
    async fn commit_read_index_if_newer(&self, index: EventStreamReadIndex) -> Result<bool>;

    /// Current lease for a stream, if any.
    async fn active_reader(&self, stream_name: &str) -> Result<Option<ActiveEventStreamReader>>;

    /// Replace the lease when the stored version matches `expected_version`
    /// (`None` = no lease stored yet). Returns whether the claim applied.
    /// A failed claim is a normal branch of the takeover loop, not an error.
    async fn try_claim_active_reader(
        &self,
        expected_version: Option<i64>,
        candidate: ActiveEventStreamReader,
    ) -> Result<bool>;
}

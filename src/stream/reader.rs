//! Buffered, ordered event stream reader.
//!
//! Runs as a cooperative task: acquires the stream lease, polls the store
//! in bounded batches after the current read index, and hands records one
//! at a time through the rendezvous to the consumer. Failed records are
//! redelivered up to the configured cap, then the stream's failure policy
//! applies. Accepted records advance the in-memory index; every Nth
//! acceptance durably commits the checkpoint, so crash recovery reprocesses
//! at most N records.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{FailurePolicy, StreamConfig};
use crate::record::{ActiveEventStreamReader, EventStreamReadIndex};
use crate::retry::with_store_backoff;
use crate::store::{CommittedRecord, EventStore, StoreError};

use super::handoff::{handoff_channel, HandoffReceiver, HandoffSender};
use super::lease::ActiveReaderManager;

/// Reader tuning, usually taken from [`StreamConfig`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub batch_size: usize,
    pub read_period: std::time::Duration,
    pub inactivity_period: std::time::Duration,
    pub heartbeat_period: std::time::Duration,
    pub retry_max_attempts: u32,
    pub on_exhausted: FailurePolicy,
    pub commit_index_every: u32,
}

impl From<&StreamConfig> for ReaderOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            batch_size: config.stream_batch_size,
            read_period: config.stream_read_period(),
            inactivity_period: config.max_active_reader_inactivity_period(),
            heartbeat_period: config.heartbeat_period(),
            retry_max_attempts: config.retry_max_attempts,
            on_exhausted: config.on_exhausted,
            commit_index_every: config.commit_index_every,
        }
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        (&StreamConfig::default()).into()
    }
}

const NO_RESET: i64 = i64::MIN;

/// Shared between the handle and the running task.
struct Control {
    stopped: AtomicBool,
    /// Operator-supplied index to resume from; `NO_RESET` when empty.
    reset_to: AtomicI64,
}

impl Control {
    fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            reset_to: AtomicI64::new(NO_RESET),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn take_reset(&self) -> Option<i64> {
        let value = self.reset_to.swap(NO_RESET, Ordering::SeqCst);
        (value != NO_RESET).then_some(value)
    }
}

/// Handle to a spawned reader task.
pub struct ReaderHandle {
    control: Arc<Control>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    /// Request cooperative stop. The task checks the flag at loop
    /// boundaries and finishes its final checkpoint and lease release.
    pub fn stop(&self) {
        self.control.stopped.store(true, Ordering::SeqCst);
    }

    /// Force the next loop iteration to resume reading after `index`.
    /// Clears a suspended stream (operator-triggered replay).
    pub fn reset_to_index(&self, index: i64) {
        self.control.reset_to.store(index, Ordering::SeqCst);
    }

    /// Wait for the task to finish. Call after [`stop`](Self::stop).
    pub async fn join(self) {
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// How one record's delivery concluded.
enum Outcome {
    Accepted,
    Skipped,
    Suspended,
    Deposed,
    ConsumerGone,
    Stopped,
}

enum LoopExit {
    Stopped,
    ConsumerGone,
}

/// The reader task. Construct through [`EventStoreReader::spawn`].
pub struct EventStoreReader {
    store: Arc<dyn EventStore>,
    lease: ActiveReaderManager,
    sender: HandoffSender,
    control: Arc<Control>,
    table: String,
    stream_name: String,
    options: ReaderOptions,

    held: Option<ActiveEventStreamReader>,
    read_index: i64,
    index_version: i64,
    accepted_since_commit: u32,
    last_heartbeat: Instant,
    suspended: bool,
}

impl EventStoreReader {
    /// Spawn a reader task for one stream.
    ///
    /// `table` is the event table to poll; `stream_name` keys the
    /// checkpoint and the lease. Returns the control handle and the
    /// consumer half of the rendezvous.
    pub fn spawn(
        store: Arc<dyn EventStore>,
        table: impl Into<String>,
        stream_name: impl Into<String>,
        options: ReaderOptions,
    ) -> (ReaderHandle, HandoffReceiver) {
        let table = table.into();
        let stream_name = stream_name.into();
        let (sender, receiver) = handoff_channel();
        let control = Arc::new(Control::new());
        let lease = ActiveReaderManager::new(
            store.clone(),
            stream_name.clone(),
            options.inactivity_period,
        );

        let reader = Self {
            store,
            lease,
            sender,
            control: control.clone(),
            table,
            stream_name,
            options,
            held: None,
            read_index: 0,
            index_version: 0,
            accepted_since_commit: 0,
            last_heartbeat: Instant::now(),
            suspended: false,
        };

        let task = tokio::spawn(reader.run());
        (ReaderHandle { control, task }, receiver)
    }

    /// Supervisor: an uncaught fault restarts the loop instead of
    /// terminating the stream; only an explicit stop (or a vanished
    /// consumer) ends the task.
    async fn run(mut self) {
        loop {
            match self.read_loop().await {
                Ok(LoopExit::Stopped) => break,
                Ok(LoopExit::ConsumerGone) => {
                    info!(stream = %self.stream_name, "consumer gone, reader stopping");
                    break;
                }
                Err(e) => {
                    error!(stream = %self.stream_name, error = %e, "stream reader faulted, restarting");
                    sleep(self.options.read_period).await;
                }
            }
            if self.control.is_stopped() {
                break;
            }
        }
        self.shutdown().await;
    }

    async fn read_loop(&mut self) -> Result<LoopExit, StoreError> {
        loop {
            if self.control.is_stopped() {
                return Ok(LoopExit::Stopped);
            }

            if let Some(index) = self.control.take_reset() {
                info!(stream = %self.stream_name, index, "resuming from operator-supplied read index");
                self.read_index = index;
                self.suspended = false;
            }

            if self.suspended {
                // Keep the lease warm so no replica resumes a halted stream
                // behind the operator's back.
                if self.held.is_some() && !self.heartbeat_if_due().await? {
                    self.held = None;
                }
                sleep(self.options.read_period).await;
                continue;
            }

            if self.held.is_none() {
                let lease = &self.lease;
                let acquired =
                    with_store_backoff(|| async move { lease.try_acquire().await }).await?;
                match acquired {
                    Some(lease) => self.adopt_leadership(lease).await?,
                    None => {
                        sleep(self.options.read_period).await;
                        continue;
                    }
                }
            } else if !self.heartbeat_if_due().await? {
                // Deposed; go back to liveness-checking.
                self.held = None;
                continue;
            }

            let store = &self.store;
            let table = self.table.as_str();
            let position = self.read_index;
            let limit = self.options.batch_size;
            let batch = with_store_backoff(|| async move {
                store.read_batch_after_position(table, position, limit).await
            })
            .await?;

            if batch.is_empty() {
                sleep(self.options.read_period).await;
                continue;
            }

            for committed in &batch {
                if self.control.is_stopped() {
                    return Ok(LoopExit::Stopped);
                }
                match self.deliver(committed).await? {
                    Outcome::Accepted | Outcome::Skipped => {
                        self.read_index = committed.position;
                        self.accepted_since_commit += 1;
                        if self.accepted_since_commit >= self.options.commit_index_every {
                            self.commit_checkpoint().await?;
                        }
                    }
                    Outcome::Suspended => {
                        self.suspended = true;
                        break;
                    }
                    Outcome::Deposed => {
                        // A successor redelivers the uncommitted tail from
                        // the durable checkpoint; delivering the rest of
                        // this batch alongside it would double-deliver.
                        self.held = None;
                        break;
                    }
                    Outcome::ConsumerGone => return Ok(LoopExit::ConsumerGone),
                    Outcome::Stopped => return Ok(LoopExit::Stopped),
                }
            }
        }
    }

    /// Hand one record to the consumer, redelivering on failure.
    ///
    /// The lease is refreshed before every attempt: a slow consumer must
    /// not starve the heartbeat into a takeover, and a deposed reader must
    /// not keep delivering next to its successor. Failed attempts are
    /// paced by the read period rather than hammered back to back.
    async fn deliver(&mut self, committed: &CommittedRecord) -> Result<Outcome, StoreError> {
        let attempts = self.options.retry_max_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.heartbeat_if_due().await? {
                return Ok(Outcome::Deposed);
            }
            match self.sender.offer(committed.record.clone()).await {
                Err(_) => return Ok(Outcome::ConsumerGone),
                Ok(true) => return Ok(Outcome::Accepted),
                Ok(false) => {
                    if self.control.is_stopped() {
                        return Ok(Outcome::Stopped);
                    }
                    debug!(
                        stream = %self.stream_name,
                        record = %committed.record.id,
                        attempt,
                        "record not processed, redelivering"
                    );
                    if attempt < attempts {
                        sleep(self.options.read_period).await;
                    }
                }
            }
        }

        match self.options.on_exhausted {
            FailurePolicy::SkipEvent => {
                warn!(
                    stream = %self.stream_name,
                    record = %committed.record.id,
                    attempts,
                    "delivery retries exhausted, skipping record"
                );
                Ok(Outcome::Skipped)
            }
            FailurePolicy::Suspend => {
                error!(
                    stream = %self.stream_name,
                    record = %committed.record.id,
                    attempts,
                    "delivery retries exhausted, stream suspended until operator intervention"
                );
                Ok(Outcome::Suspended)
            }
        }
    }

    /// Become the active reader: adopt the durable checkpoint (or the
    /// previous holder's position) and wait for the lazily created table.
    async fn adopt_leadership(
        &mut self,
        lease: ActiveEventStreamReader,
    ) -> Result<(), StoreError> {
        let store = &self.store;
        let stream_name = self.stream_name.as_str();
        let stored =
            with_store_backoff(|| async move { store.read_index(stream_name).await }).await?;

        self.index_version = stored.as_ref().map(|i| i.version).unwrap_or(0);
        self.read_index = stored
            .as_ref()
            .map(|i| i.read_index)
            .unwrap_or(0)
            .max(lease.read_position);
        self.accepted_since_commit = 0;
        self.last_heartbeat = Instant::now();
        info!(
            stream = %self.stream_name,
            read_index = self.read_index,
            "reading as active reader"
        );
        self.held = Some(lease);

        let table = self.table.as_str();
        while !self.control.is_stopped() {
            let exists = with_store_backoff(|| async move { store.table_exists(table).await }).await?;
            if exists {
                break;
            }
            debug!(table, "waiting for event table to be created");
            sleep(self.options.read_period).await;
        }
        Ok(())
    }

    /// Refresh the lease when the heartbeat period elapsed.
    /// Returns false when leadership was lost.
    async fn heartbeat_if_due(&mut self) -> Result<bool, StoreError> {
        if self.last_heartbeat.elapsed() < self.options.heartbeat_period {
            return Ok(true);
        }
        let Some(held) = self.held.clone() else {
            return Ok(false);
        };
        match self.lease.heartbeat(&held, self.read_index).await? {
            Some(refreshed) => {
                self.held = Some(refreshed);
                self.last_heartbeat = Instant::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Durably commit the in-memory read index.
    async fn commit_checkpoint(&mut self) -> Result<(), StoreError> {
        let index = EventStreamReadIndex {
            id: self.stream_name.clone(),
            read_index: self.read_index,
            version: self.index_version + 1,
        };
        let store = &self.store;
        let committed = with_store_backoff(|| {
            let index = index.clone();
            async move { store.commit_read_index_if_newer(index).await }
        })
        .await?;

        if committed {
            self.index_version += 1;
        } else {
            // Another process advanced the checkpoint, which also means our
            // leadership is in question; adopt the stored version and let
            // the next heartbeat sort leadership out.
            let stream_name = self.stream_name.as_str();
            let stored =
                with_store_backoff(|| async move { store.read_index(stream_name).await }).await?;
            let stored_version = stored.map(|i| i.version).unwrap_or(0);
            warn!(
                stream = %self.stream_name,
                attempted = self.index_version + 1,
                stored = stored_version,
                "checkpoint commit lost CAS race"
            );
            self.index_version = stored_version;
        }
        self.accepted_since_commit = 0;
        Ok(())
    }

    /// Final checkpoint and lease release on the way out.
    async fn shutdown(&mut self) {
        if let Some(held) = self.held.take() {
            if self.accepted_since_commit > 0 {
                if let Err(e) = self.commit_checkpoint().await {
                    warn!(stream = %self.stream_name, error = %e, "final checkpoint commit failed");
                }
            }
            if let Err(e) = self.lease.release(&held).await {
                warn!(stream = %self.stream_name, error = %e, "lease release failed");
            }
        }
        info!(stream = %self.stream_name, "stream reader stopped");
    }
}

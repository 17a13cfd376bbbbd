//! Optimistic-concurrency write path.
//!
//! Commands run against state replayed from the latest snapshot plus newer
//! events. The produced event is stamped with the next version and appended
//! under a deterministic id; losing a version race restarts the attempt.
//! The version-keyed append turns concurrent writers into a storage-level
//! first-writer-wins race instead of a distributed lock: losers redo cheap
//! work, and conflicts on a single aggregate are rare.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SourcingConfig;
use crate::record::{EventRecord, Snapshot};
use crate::registry::{Aggregate, AggregateEntry, AggregateRegistry, Event, RegistryError};
use crate::retry::with_store_backoff;
use crate::store::{EventStore, StoreError};

/// An event the store has durably accepted.
///
/// Constructed only after the append has succeeded, so a held value always
/// refers to committed history, never to a candidate that lost its race.
#[derive(Debug, Clone)]
pub struct RecordedEvent<E> {
    pub aggregate_id: String,
    /// The version this event claimed.
    pub version: i64,
    /// Epoch milliseconds at append time.
    pub created_at: i64,
    pub event: E,
}

/// Errors raised while replaying an aggregate's history.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("snapshot codec error: {0}")]
    Codec(serde_json::Error),
}

/// Errors raised while executing a command.
///
/// Generic over `R`, the caller's rejection type: a command that refuses to
/// produce an event surfaces unchanged and is never retried.
#[derive(Debug, thiserror::Error)]
pub enum CommandError<R>
where
    R: std::error::Error + Send + Sync + 'static,
{
    /// Business-rule violation raised by the command itself.
    #[error(transparent)]
    Rejected(R),

    /// Every append attempt lost its version race.
    #[error("optimistic concurrency retries exhausted after {attempts} attempts")]
    TooManyRetries { attempts: u32 },

    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("event codec error: {0}")]
    Codec(serde_json::Error),
}

/// Write path for one aggregate type.
pub struct EventSourcingService<A: Aggregate> {
    registry: Arc<AggregateRegistry>,
    store: Arc<dyn EventStore>,
    config: SourcingConfig,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> EventSourcingService<A> {
    pub fn new(
        registry: Arc<AggregateRegistry>,
        store: Arc<dyn EventStore>,
        config: SourcingConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            _aggregate: PhantomData,
        }
    }

    /// Execute a command against a new aggregate.
    ///
    /// The command sees the empty state at version 0 unless a concurrent
    /// creator got there first, in which case the replayed state reflects
    /// that history like any other update.
    pub async fn create<E, R, F>(
        &self,
        aggregate_id: &str,
        command: F,
    ) -> Result<RecordedEvent<E>, CommandError<R>>
    where
        E: Event<A>,
        R: std::error::Error + Send + Sync + 'static,
        F: Fn(&A) -> Result<E, R>,
    {
        self.execute(aggregate_id, command).await
    }

    /// Execute a command against the aggregate's current state.
    pub async fn update<E, R, F>(
        &self,
        aggregate_id: &str,
        command: F,
    ) -> Result<RecordedEvent<E>, CommandError<R>>
    where
        E: Event<A>,
        R: std::error::Error + Send + Sync + 'static,
        F: Fn(&A) -> Result<E, R>,
    {
        self.execute(aggregate_id, command).await
    }

    /// Current state of an aggregate: snapshot (if any) plus newer events.
    pub async fn state(&self, aggregate_id: &str) -> Result<A, ReplayError> {
        let entry = self.registry.lookup::<A>()?;
        let (_, state) = self.replay(entry, aggregate_id).await?;
        Ok(state)
    }

    async fn execute<E, R, F>(
        &self,
        aggregate_id: &str,
        command: F,
    ) -> Result<RecordedEvent<E>, CommandError<R>>
    where
        E: Event<A>,
        R: std::error::Error + Send + Sync + 'static,
        F: Fn(&A) -> Result<E, R>,
    {
        let entry = self
            .registry
            .lookup::<A>()
            .map_err(ReplayError::Registry)?;
        let attempts = self.config.max_concurrency_attempts.max(1);

        for attempt in 1..=attempts {
            let (current_version, state) = self.replay(entry, aggregate_id).await?;

            // A rejection is a business-rule violation, not a storage race:
            // surface it unchanged, never retry.
            let event = command(&state).map_err(CommandError::Rejected)?;

            let next_version = current_version + 1;
            let payload = serde_json::to_string(&event).map_err(CommandError::Codec)?;
            let record = EventRecord::new(aggregate_id, next_version, E::NAME, payload);
            let created_at = record.created_at;

            let appended = with_store_backoff(|| {
                let record = record.clone();
                async move { self.store.append_event(A::KIND, record).await }
            })
            .await;

            match appended {
                Ok(()) => {
                    if self.snapshot_due(next_version) {
                        let mut state = state;
                        event.apply_to(&mut state);
                        self.write_snapshot(aggregate_id, next_version, &state).await;
                    }
                    return Ok(RecordedEvent {
                        aggregate_id: aggregate_id.to_string(),
                        version: next_version,
                        created_at,
                        event,
                    });
                }
                Err(StoreError::DuplicateVersion { id }) => {
                    // Lost the race for this version; replay and go again.
                    debug!(
                        aggregate = A::KIND,
                        aggregate_id,
                        record_id = %id,
                        attempt,
                        "version conflict, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CommandError::TooManyRetries { attempts })
    }

    async fn replay(
        &self,
        entry: &AggregateEntry<A>,
        aggregate_id: &str,
    ) -> Result<(i64, A), ReplayError> {
        let snapshot = with_store_backoff(|| async move {
            self.store.snapshot(A::KIND, aggregate_id).await
        })
        .await?;

        let (mut version, mut state) = match snapshot {
            Some(snapshot) => {
                let state = serde_json::from_str(&snapshot.snapshot).map_err(ReplayError::Codec)?;
                (snapshot.version, state)
            }
            None => (0, entry.empty_state(aggregate_id)),
        };

        let from_version = version;
        let events = with_store_backoff(|| async move {
            self.store
                .read_events_after_version(A::KIND, aggregate_id, from_version)
                .await
        })
        .await?;

        for record in &events {
            entry.apply_record(&mut state, record)?;
            version = record.aggregate_version;
        }

        Ok((version, state))
    }

    fn snapshot_due(&self, version: i64) -> bool {
        self.config.snapshot_frequency > 0 && version % self.config.snapshot_frequency == 0
    }

    /// Best-effort snapshot write. Failures are logged and swallowed: the
    /// command already succeeded, and snapshots are never authoritative.
    async fn write_snapshot(&self, aggregate_id: &str, version: i64, state: &A) {
        let body = match serde_json::to_string(state) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    aggregate = A::KIND,
                    aggregate_id,
                    version,
                    error = %e,
                    "failed to serialize snapshot"
                );
                return;
            }
        };
        let snapshot = Snapshot {
            id: aggregate_id.to_string(),
            snapshot: body,
            version,
        };
        match self.store.put_snapshot_if_newer(A::KIND, snapshot).await {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent writer stored a newer one; ours is obsolete.
                debug!(aggregate = A::KIND, aggregate_id, version, "snapshot superseded");
            }
            Err(e) => {
                warn!(
                    aggregate = A::KIND,
                    aggregate_id,
                    version,
                    error = %e,
                    "failed to store snapshot"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests;

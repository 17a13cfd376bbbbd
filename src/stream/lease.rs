//! Active-reader leadership via a versioned lease.
//!
//! When multiple processes instantiate a reader for the same stream name,
//! exactly one may poll and dispatch. Leadership is a single-writer lease
//! claimed through optimistic versioned CAS on the store - not consensus: a
//! stale lease costs at most a bounded processing pause, never
//! double-delivery, as long as the store's CAS is atomic.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::record::{now_millis, ActiveEventStreamReader};
use crate::store::{EventStore, Result, StoreError};

/// Lease protocol for one stream name.
pub struct ActiveReaderManager {
    store: Arc<dyn EventStore>,
    stream_name: String,
    reader_id: String,
    inactivity_period: Duration,
}

impl ActiveReaderManager {
    pub fn new(store: Arc<dyn EventStore>, stream_name: String, inactivity_period: Duration) -> Self {
        Self {
            store,
            stream_name,
            reader_id: Uuid::new_v4().to_string(),
            inactivity_period,
        }
    }

    /// This process's identity in lease records.
    pub fn reader_id(&self) -> &str {
        &self.reader_id
    }

    fn is_stale(&self, lease: &ActiveEventStreamReader) -> bool {
        now_millis() - lease.last_interaction > self.inactivity_period.as_millis() as i64
    }

    /// Attempt to become the active reader.
    ///
    /// Returns the held lease when this process now leads, `None` when a
    /// live holder exists or the claim lost its CAS race. A lost race is a
    /// normal branch: the caller re-checks liveness on its next cycle.
    pub async fn try_acquire(&self) -> Result<Option<ActiveEventStreamReader>> {
        let observed = self.store.active_reader(&self.stream_name).await?;

        if let Some(lease) = &observed {
            if lease.reader_id == self.reader_id {
                return Ok(Some(lease.clone()));
            }
            if !self.is_stale(lease) {
                return Ok(None);
            }
        }

        let candidate =
            ActiveEventStreamReader::candidate(&self.stream_name, &self.reader_id, observed.as_ref());
        let expected = observed.as_ref().map(|l| l.version);
        if self
            .store
            .try_claim_active_reader(expected, candidate.clone())
            .await?
        {
            info!(
                stream = %self.stream_name,
                reader = %self.reader_id,
                version = candidate.version,
                read_position = candidate.read_position,
                "acquired stream leadership"
            );
            Ok(Some(candidate))
        } else {
            debug!(stream = %self.stream_name, reader = %self.reader_id, "leadership claim lost CAS race");
            Ok(None)
        }
    }

    /// Refresh a held lease so peers keep seeing the holder as alive.
    ///
    /// Returns the refreshed lease, or `None` when leadership has been
    /// taken over in the meantime.
    pub async fn heartbeat(
        &self,
        held: &ActiveEventStreamReader,
        read_position: i64,
    ) -> Result<Option<ActiveEventStreamReader>> {
        let refreshed = held.refreshed(read_position);
        if self
            .store
            .try_claim_active_reader(Some(held.version), refreshed.clone())
            .await?
        {
            Ok(Some(refreshed))
        } else {
            info!(
                stream = %self.stream_name,
                reader = %self.reader_id,
                "leadership lost to another reader"
            );
            Ok(None)
        }
    }

    /// Give up a held lease on graceful stop.
    ///
    /// Zeroes `last_interaction` so peers see the lease as stale at once
    /// instead of waiting out the inactivity period. Best-effort: a lost
    /// CAS means someone already took over.
    pub async fn release(&self, held: &ActiveEventStreamReader) -> Result<()> {
        let released = ActiveEventStreamReader {
            last_interaction: 0,
            ..held.clone()
        };
        match self
            .store
            .try_claim_active_reader(Some(held.version), released)
            .await
        {
            Ok(_) => Ok(()),
            // Releasing is courtesy; an unreachable store must not block stop.
            Err(StoreError::Unavailable(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

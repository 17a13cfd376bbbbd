use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::*;
use crate::record::{ActiveEventStreamReader, EventStreamReadIndex};
use crate::store::{CommittedRecord, MemoryEventStore, Result as StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: String,
    balance: i64,
}

impl Aggregate for Account {
    const KIND: &'static str = "account";

    fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            balance: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Deposited {
    amount: i64,
}

impl Event<Account> for Deposited {
    const NAME: &'static str = "ACCOUNT_DEPOSITED";

    fn apply_to(&self, state: &mut Account) {
        state.balance += self.amount;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("insufficient funds")]
struct InsufficientFunds;

fn registry() -> Arc<AggregateRegistry> {
    let mut registry = AggregateRegistry::new();
    registry
        .register::<Account, _>(|reg| {
            reg.event::<Deposited>()?;
            Ok(())
        })
        .unwrap();
    Arc::new(registry)
}

fn service(store: Arc<dyn EventStore>, config: SourcingConfig) -> EventSourcingService<Account> {
    EventSourcingService::new(registry(), store, config)
}

/// Store wrapper that fails the first `failures` appends before delegating.
struct FlakyStore {
    inner: MemoryEventStore,
    failures: AtomicU32,
    make_error: fn() -> StoreError,
}

impl FlakyStore {
    fn new(failures: u32, make_error: fn() -> StoreError) -> Self {
        Self {
            inner: MemoryEventStore::new(),
            failures: AtomicU32::new(failures),
            make_error,
        }
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn append_event(&self, table: &str, record: EventRecord) -> StoreResult<()> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err((self.make_error)());
        }
        self.inner.append_event(table, record).await
    }

    async fn read_events_after_version(
        &self,
        table: &str,
        aggregate_id: &str,
        version: i64,
    ) -> StoreResult<Vec<EventRecord>> {
        self.inner
            .read_events_after_version(table, aggregate_id, version)
            .await
    }

    async fn read_batch_after_position(
        &self,
        table: &str,
        position: i64,
        limit: usize,
    ) -> StoreResult<Vec<CommittedRecord>> {
        self.inner
            .read_batch_after_position(table, position, limit)
            .await
    }

    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        self.inner.table_exists(table).await
    }

    async fn snapshot(&self, table: &str, aggregate_id: &str) -> StoreResult<Option<Snapshot>> {
        self.inner.snapshot(table, aggregate_id).await
    }

    async fn put_snapshot_if_newer(&self, table: &str, snapshot: Snapshot) -> StoreResult<bool> {
        self.inner.put_snapshot_if_newer(table, snapshot).await
    }

    async fn read_index(&self, stream_name: &str) -> StoreResult<Option<EventStreamReadIndex>> {
        self.inner.read_index(stream_name).await
    }

    async fn commit_read_index_if_newer(&self, index: EventStreamReadIndex) -> StoreResult<bool> {
        self.inner.commit_read_index_if_newer(index).await
    }

    async fn active_reader(
        &self,
        stream_name: &str,
    ) -> StoreResult<Option<ActiveEventStreamReader>> {
        self.inner.active_reader(stream_name).await
    }

    async fn try_claim_active_reader(
        &self,
        expected_version: Option<i64>,
        candidate: ActiveEventStreamReader,
    ) -> StoreResult<bool> {
        self.inner
            .try_claim_active_reader(expected_version, candidate)
            .await
    }
}

#[tokio::test]
async fn create_then_state() {
    let service = service(Arc::new(MemoryEventStore::new()), SourcingConfig::default());

    let recorded = service
        .create::<Deposited, InsufficientFunds, _>("a-1", |_| Ok(Deposited { amount: 100 }))
        .await
        .unwrap();
    assert_eq!(recorded.version, 1);
    assert_eq!(recorded.aggregate_id, "a-1");

    let state = service.state("a-1").await.unwrap();
    assert_eq!(state.balance, 100);
}

#[tokio::test]
async fn state_of_unknown_aggregate_is_empty() {
    let service = service(Arc::new(MemoryEventStore::new()), SourcingConfig::default());
    let state = service.state("missing").await.unwrap();
    assert_eq!(state, Account::empty("missing"));
}

#[tokio::test]
async fn versions_increase_by_one_per_update() {
    let service = service(Arc::new(MemoryEventStore::new()), SourcingConfig::default());
    for expected in 1..=5 {
        let recorded = service
            .update::<Deposited, InsufficientFunds, _>("a-1", |_| Ok(Deposited { amount: 1 }))
            .await
            .unwrap();
        assert_eq!(recorded.version, expected);
    }
}

#[tokio::test]
async fn rejected_command_is_not_retried() {
    let service = service(Arc::new(MemoryEventStore::new()), SourcingConfig::default());
    let calls = AtomicU32::new(0);

    let err = service
        .update::<Deposited, InsufficientFunds, _>("a-1", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(InsufficientFunds)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Rejected(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn version_conflict_is_retried_to_success() {
    let store = Arc::new(FlakyStore::new(2, || StoreError::DuplicateVersion {
        id: "a-1-1".to_string(),
    }));
    let service = service(store, SourcingConfig::default());
    let calls = AtomicU32::new(0);

    let recorded = service
        .update::<Deposited, InsufficientFunds, _>("a-1", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Deposited { amount: 10 })
        })
        .await
        .unwrap();

    assert_eq!(recorded.version, 1);
    // Two conflicted attempts plus the winning one, each re-running the command.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_exhausted_raises_too_many_retries() {
    let store = Arc::new(FlakyStore::new(u32::MAX, || StoreError::DuplicateVersion {
        id: "a-1-1".to_string(),
    }));
    let config = SourcingConfig {
        max_concurrency_attempts: 3,
        ..SourcingConfig::default()
    };
    let service = service(store, config);

    let err = service
        .update::<Deposited, InsufficientFunds, _>("a-1", |_| Ok(Deposited { amount: 10 }))
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::TooManyRetries { attempts: 3 }));
}

#[tokio::test]
async fn transient_outage_is_retried_inside_one_attempt() {
    let store = Arc::new(FlakyStore::new(2, || {
        StoreError::Unavailable("backend down".to_string())
    }));
    let service = service(store, SourcingConfig::default());
    let calls = AtomicU32::new(0);

    let recorded = service
        .update::<Deposited, InsufficientFunds, _>("a-1", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Deposited { amount: 10 })
        })
        .await
        .unwrap();

    assert_eq!(recorded.version, 1);
    // Outages are retried below the command, not by re-running it.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn snapshot_written_at_frequency_and_used_for_replay() {
    let store = Arc::new(MemoryEventStore::new());
    let config = SourcingConfig {
        snapshot_frequency: 2,
        ..SourcingConfig::default()
    };
    let service = service(store.clone(), config);

    for _ in 0..4 {
        service
            .update::<Deposited, InsufficientFunds, _>("a-1", |_| Ok(Deposited { amount: 5 }))
            .await
            .unwrap();
    }

    let snapshot = store.snapshot("account", "a-1").await.unwrap().unwrap();
    assert_eq!(snapshot.version, 4);
    let cached: Account = serde_json::from_str(&snapshot.snapshot).unwrap();
    assert_eq!(cached.balance, 20);

    // Replay from the snapshot matches a full replay.
    assert_eq!(service.state("a-1").await.unwrap().balance, 20);
}

#[tokio::test]
async fn snapshot_disabled_when_frequency_is_zero() {
    let store = Arc::new(MemoryEventStore::new());
    let config = SourcingConfig {
        snapshot_frequency: 0,
        ..SourcingConfig::default()
    };
    let service = service(store.clone(), config);

    for _ in 0..4 {
        service
            .update::<Deposited, InsufficientFunds, _>("a-1", |_| Ok(Deposited { amount: 5 }))
            .await
            .unwrap();
    }
    assert!(store.snapshot("account", "a-1").await.unwrap().is_none());
}

//! Skald - event-sourced aggregate persistence and ordered stream delivery.
//!
//! Aggregates are rebuilt by replaying their events (optionally accelerated
//! by snapshots); committed events are distributed to subscribers in commit
//! order with at-least-once delivery and single-active-reader leasing.

pub mod bootstrap;
pub mod config;
pub mod record;
pub mod registry;
pub mod retry;
pub mod sourcing;
pub mod store;
pub mod stream;

pub use config::{EngineConfig, FailurePolicy, SourcingConfig, StreamConfig};
pub use record::{ActiveEventStreamReader, EventRecord, EventStreamReadIndex, Snapshot};
pub use registry::{Aggregate, AggregateRegistry, Event, RegistryError};
pub use sourcing::{CommandError, EventSourcingService, RecordedEvent, ReplayError};
pub use store::{CommittedRecord, EventStore, StoreError};
pub use stream::{EventStoreReader, EventStreamSubscriber, Subscription, Subscriptions};

//! One-call wiring of a stream: reader + subscriber per stream name.

use std::sync::Arc;

use crate::config::StreamConfig;
use crate::registry::{Aggregate, AggregateRegistry, RegistryError};
use crate::store::EventStore;

use super::reader::{EventStoreReader, ReaderHandle, ReaderOptions};
use super::subscriber::{EventStreamSubscriber, SubscriberBuilder};

/// Factory wiring registry, store and stream configuration together.
pub struct Subscriptions {
    registry: Arc<AggregateRegistry>,
    store: Arc<dyn EventStore>,
    config: StreamConfig,
}

impl Subscriptions {
    pub fn new(
        registry: Arc<AggregateRegistry>,
        store: Arc<dyn EventStore>,
        config: StreamConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    /// Subscribe to aggregate `A`'s events under `stream_name`.
    ///
    /// Stream identity is keyed by `(stream_name, aggregate kind)`, so two
    /// streams of different aggregates under the same name don't collide.
    /// The returned [`Subscription`] owns both spawned tasks.
    pub fn subscribe<A, F>(&self, stream_name: &str, bind: F) -> Result<Subscription, RegistryError>
    where
        A: Aggregate,
        F: FnOnce(SubscriberBuilder<'_, A>) -> Result<SubscriberBuilder<'_, A>, RegistryError>,
    {
        let entry = self.registry.lookup::<A>()?;
        let builder = bind(SubscriberBuilder::new(entry))?;

        let qualified = format!("{stream_name}::{}", A::KIND);
        let (reader, receiver) = EventStoreReader::spawn(
            self.store.clone(),
            A::KIND,
            qualified,
            ReaderOptions::from(&self.config),
        );
        let subscriber = builder.spawn(receiver);

        Ok(Subscription { reader, subscriber })
    }
}

/// A running stream: the reader task and its subscriber.
pub struct Subscription {
    reader: ReaderHandle,
    subscriber: EventStreamSubscriber,
}

impl Subscription {
    /// Operator-triggered replay from an earlier position.
    pub fn reset_to_index(&self, index: i64) {
        self.reader.reset_to_index(index);
    }

    /// Stop both tasks and wait for the reader to finish its final
    /// checkpoint and lease release.
    ///
    /// The subscriber is stopped first so a reader blocked in the
    /// rendezvous wakes up instead of waiting on an acknowledgement that
    /// will never come.
    pub async fn stop(self) {
        self.subscriber.stop();
        self.reader.stop();
        self.reader.join().await;
    }
}

//! Typed event dispatch for one stream.
//!
//! A subscriber maps event types to async handlers, drains the reader's
//! rendezvous one record at a time and reports each record's outcome back
//! to drive the reader's retry and failure policy. An event with no
//! registered handler is acknowledged as processed: subscribers only care
//! about the types they asked for.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::record::EventRecord;
use crate::registry::{Aggregate, AggregateEntry, Event, RegistryError};
use crate::sourcing::RecordedEvent;

use super::handoff::HandoffReceiver;

/// Error type handlers report delivery failure with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Box<dyn Fn(EventRecord) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Fluent registrar binding event types to handlers at subscription time.
pub struct SubscriberBuilder<'r, A: Aggregate> {
    entry: &'r AggregateEntry<A>,
    handlers: HashMap<&'static str, Handler>,
}

impl<'r, A: Aggregate> SubscriberBuilder<'r, A> {
    pub(crate) fn new(entry: &'r AggregateEntry<A>) -> Self {
        Self {
            entry,
            handlers: HashMap::new(),
        }
    }

    /// Bind an async handler for event type `E`.
    ///
    /// Fails when `E` is not registered for the aggregate: a handler for an
    /// event that can never appear in the stream is a wiring bug worth
    /// failing loudly at startup.
    pub fn on<E, F, Fut>(mut self, handler: F) -> Result<Self, RegistryError>
    where
        E: Event<A>,
        F: Fn(RecordedEvent<E>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.entry.ensure_registered(E::NAME)?;
        self.handlers.insert(
            E::NAME,
            Box::new(
                move |record: EventRecord| -> BoxFuture<'static, Result<(), HandlerError>> {
                    let decoded = serde_json::from_str::<E>(&record.payload).map(|event| {
                        RecordedEvent {
                            aggregate_id: record.aggregate_id.clone(),
                            version: record.aggregate_version,
                            created_at: record.created_at,
                            event,
                        }
                    });
                    match decoded {
                        Ok(event) => Box::pin(handler(event)),
                        Err(e) => Box::pin(std::future::ready(Err(e.into()))),
                    }
                },
            ),
        );
        Ok(self)
    }

    /// Spawn the drain task consuming `receiver`.
    pub fn spawn(self, receiver: HandoffReceiver) -> EventStreamSubscriber {
        EventStreamSubscriber::spawn(self.handlers, receiver)
    }
}

/// Running subscriber task for one stream.
pub struct EventStreamSubscriber {
    task: JoinHandle<()>,
}

impl EventStreamSubscriber {
    fn spawn(handlers: HashMap<&'static str, Handler>, receiver: HandoffReceiver) -> Self {
        Self {
            task: tokio::spawn(Self::drain(handlers, receiver)),
        }
    }

    async fn drain(handlers: HashMap<&'static str, Handler>, mut receiver: HandoffReceiver) {
        while let Some(delivery) = receiver.recv().await {
            let title = delivery.record.event_title.clone();
            let processed = match handlers.get(title.as_str()) {
                None => {
                    debug!(event = %title, "no handler registered, acknowledging");
                    true
                }
                Some(handler) => match handler(delivery.record.clone()).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(event = %title, error = %e, "handler failed");
                        false
                    }
                },
            };
            delivery.resolve(processed);
        }
    }

    /// Abandon the drain task. Any in-flight handoff resolves as
    /// not-processed on the reader side, so stop never deadlocks.
    pub fn stop(&self) {
        self.task.abort();
    }
}

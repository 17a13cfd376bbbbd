//! Ordered, at-least-once event stream delivery.
//!
//! An [`EventStoreReader`] polls the store in batches and hands records one
//! at a time through a single-slot rendezvous to an
//! [`EventStreamSubscriber`]; an active-reader lease lets replicated
//! processes share one logical stream without duplicate or out-of-order
//! delivery. [`Subscriptions`] wires the pieces together per stream name.

pub mod handoff;
pub mod lease;
pub mod reader;
pub mod subscriber;
pub mod subscriptions;

pub use handoff::{handoff_channel, Delivery, HandoffClosed, HandoffReceiver, HandoffSender};
pub use lease::ActiveReaderManager;
pub use reader::{EventStoreReader, ReaderHandle, ReaderOptions};
pub use subscriber::{EventStreamSubscriber, HandlerError, SubscriberBuilder};
pub use subscriptions::{Subscription, Subscriptions};

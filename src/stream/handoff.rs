//! Single-slot rendezvous between reader and consumer.
//!
//! The reader offers one record and suspends until the consumer has both
//! received it and reported processed/not-processed. This gives strict
//! one-at-a-time, in-order delivery and natural backpressure: a consumer
//! never observes record N+1 before acknowledging record N.

use tokio::sync::{mpsc, oneshot};

use crate::record::EventRecord;

/// The other side of the handoff is gone.
#[derive(Debug, thiserror::Error)]
#[error("handoff channel closed")]
pub struct HandoffClosed;

/// Producer half; owned by the stream reader.
pub struct HandoffSender {
    tx: mpsc::Sender<(EventRecord, oneshot::Sender<bool>)>,
}

/// Consumer half; owned by the subscriber.
pub struct HandoffReceiver {
    rx: mpsc::Receiver<(EventRecord, oneshot::Sender<bool>)>,
}

/// One record pending acknowledgement.
pub struct Delivery {
    pub record: EventRecord,
    ack: oneshot::Sender<bool>,
}

impl Delivery {
    /// Report the processing result back to the waiting reader.
    pub fn resolve(self, processed: bool) {
        // The reader may have been stopped while we were processing; it no
        // longer cares about the result.
        let _ = self.ack.send(processed);
    }
}

/// Create a connected handoff pair.
pub fn handoff_channel() -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl HandoffSender {
    /// Offer one record and wait for the consumer's verdict.
    ///
    /// Returns `Ok(processed)` once the consumer resolved the delivery, and
    /// `Ok(false)` when the consumer abandoned the record without resolving
    /// it. Fails only when the consumer side is gone entirely.
    pub async fn offer(&self, record: EventRecord) -> Result<bool, HandoffClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((record, ack_tx))
            .await
            .map_err(|_| HandoffClosed)?;
        Ok(ack_rx.await.unwrap_or(false))
    }
}

impl HandoffReceiver {
    /// Wait for the next record. `None` once the reader is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx
            .recv()
            .await
            .map(|(record, ack)| Delivery { record, ack })
    }
}

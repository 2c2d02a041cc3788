//! Drives projections from the event bus on a background thread.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use serde_json::Value as JsonValue;

use plaza_events::{EventBus, EventEnvelope};

use crate::projections::EnvelopeConsumer;

/// Subscribes to the bus and fans every envelope out to the registered
/// projections. Consumers are idempotent, so at-least-once delivery from the
/// bus is safe; a consumer error is logged and does not stop the worker
/// (the projection can be rebuilt from the store).
pub struct ProjectionWorker {
    handle: Option<JoinHandle<()>>,
}

impl ProjectionWorker {
    /// Spawn the worker. Returns once the subscription is in place, so no
    /// event published after this call can be missed.
    pub fn spawn<B>(bus: &B, consumers: Vec<Arc<dyn EnvelopeConsumer>>) -> Self
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        let subscription = bus.subscribe();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();

        let handle = std::thread::spawn(move || {
            let _ = ready_tx.send(());
            loop {
                match subscription.recv() {
                    Ok(envelope) => {
                        for consumer in &consumers {
                            if let Err(e) = consumer.apply_envelope(&envelope) {
                                tracing::error!(
                                    projection = consumer.name(),
                                    error = %e,
                                    "projection failed to apply envelope"
                                );
                            }
                        }
                    }
                    // Bus dropped; nothing further will arrive.
                    Err(_) => break,
                }
            }
        });

        let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));

        Self {
            handle: Some(handle),
        }
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProjectionWorker {
    fn drop(&mut self) {
        // The thread exits when the bus is dropped; detach rather than block.
        self.handle.take();
    }
}

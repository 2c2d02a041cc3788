//! Read-model projections over the event stream.
//!
//! Each projection folds one aggregate type's events into a queryable read
//! model. Projections are idempotent consumers: duplicate envelopes are
//! skipped by a per-stream sequence cursor, and read models can always be
//! cleared and rebuilt by replaying the store.

pub mod disputes;
pub mod escrow_entries;
pub mod invoices;
pub mod orders;
pub mod payout_schedules;

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use plaza_core::AggregateId;
use plaza_events::EventEnvelope;

pub use disputes::{DisputeReadModel, DisputesProjection};
pub use escrow_entries::{EscrowEntriesProjection, EscrowEntryReadModel};
pub use invoices::{InvoiceReadModel, InvoicesProjection};
pub use orders::{OrderReadModel, OrdersProjection, SellerOrderReadModel};
pub use payout_schedules::{PayoutScheduleReadModel, PayoutSchedulesProjection};

use std::sync::Arc;

use crate::read_model::InMemoryReadStore;

/// Shared in-memory projection handles, as the services and API wire them.
pub type SharedOrdersProjection = Arc<
    OrdersProjection<Arc<InMemoryReadStore<plaza_orders::OrderId, OrderReadModel>>>,
>;
pub type SharedEscrowEntriesProjection = Arc<
    EscrowEntriesProjection<Arc<InMemoryReadStore<plaza_orders::SellerOrderId, EscrowEntryReadModel>>>,
>;
pub type SharedPayoutSchedulesProjection =
    Arc<PayoutSchedulesProjection<Arc<InMemoryReadStore<AggregateId, PayoutScheduleReadModel>>>>;
pub type SharedInvoicesProjection =
    Arc<InvoicesProjection<Arc<InMemoryReadStore<AggregateId, InvoiceReadModel>>>>;
pub type SharedDisputesProjection = Arc<
    DisputesProjection<Arc<InMemoryReadStore<plaza_disputes::ReturnRequestId, DisputeReadModel>>>,
>;

#[derive(Debug, Error)]
pub enum ProjectionApplyError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// A consumer of raw event envelopes (what the projection worker drives).
pub trait EnvelopeConsumer: Send + Sync {
    fn name(&self) -> &str;

    fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError>;

    /// Drop all read-model state and cursors (rebuild support).
    fn reset(&self);
}

/// Rebuild projections by replaying the whole store into them.
///
/// Streams are independent; events only need their per-stream order, so a
/// (stream, sequence) sort is enough.
pub fn rebuild_from_events(
    consumers: &[std::sync::Arc<dyn EnvelopeConsumer>],
    mut events: Vec<crate::event_store::StoredEvent>,
) {
    for consumer in consumers {
        consumer.reset();
    }

    events.sort_by_key(|e| (*e.aggregate_id.as_uuid(), e.sequence_number));
    for event in &events {
        let envelope = event.to_envelope();
        for consumer in consumers {
            if let Err(e) = consumer.apply_envelope(&envelope) {
                tracing::error!(
                    projection = consumer.name(),
                    error = %e,
                    "rebuild failed to apply envelope"
                );
            }
        }
    }
}

/// Per-stream sequence cursors shared by all projections.
///
/// `advance` returns `Ok(false)` for an already-applied envelope (the
/// at-least-once duplicate case) and errors on gaps, which would mean the
/// projection missed an event and must be rebuilt.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<bool, ProjectionApplyError> {
        let mut cursors = self
            .cursors
            .write()
            .expect("projection cursor lock poisoned");
        let last = cursors.get(&envelope.aggregate_id()).copied().unwrap_or(0);
        let found = envelope.sequence_number();

        if found <= last {
            return Ok(false);
        }
        if found != last + 1 {
            return Err(ProjectionApplyError::NonMonotonicSequence { last, found });
        }

        cursors.insert(envelope.aggregate_id(), found);
        Ok(true)
    }

    pub fn clear(&self) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
    }
}

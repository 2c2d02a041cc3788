//! Command execution pipeline (application-level orchestration).
//!
//! One pipeline for every aggregate: load the stream, rehydrate, decide,
//! append with the optimistic-concurrency expectation, publish. This is the
//! transaction boundary of the system — a rejected command appends nothing,
//! and two concurrent identical commands cannot both commit: the second
//! either fails the version check (and is retried against the updated
//! stream) or decides an empty event vector against the state the first one
//! wrote.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use plaza_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use plaza_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version). The caller
    /// retries; it must never be silently ignored.
    Concurrency(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Placement-time precondition violations, with every issue listed.
    ValidationFailed(Vec<String>),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// A status/workflow move outside the transition table.
    InvalidTransition(String),
    /// The acting party does not own the resource.
    Forbidden,
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; a retry
    /// may duplicate delivery, consumers are idempotent).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::ValidationFailed(issues) => DispatchError::ValidationFailed(issues),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidTransition(msg) => DispatchError::InvalidTransition(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Forbidden => DispatchError::Forbidden,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Sits between the service/API layer and the event store + bus. Events are
/// persisted before publication; if the append fails nothing is published,
/// if publication fails the events are already durable and replays are
/// absorbed by idempotent consumers.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// 1. Load the stream and validate its shape
    /// 2. Rehydrate the aggregate from history
    /// 3. Decide events (pure; empty vector ⇒ idempotent no-op, nothing
    ///    appended)
    /// 4. Append with `ExpectedVersion::Exact(loaded version)`
    /// 5. Publish committed events to the bus
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: plaza_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();

        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist with optimistic concurrency
        let uncommitted: Vec<UncommittedEvent> = decided
            .iter()
            .map(|event| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    event,
                )
            })
            .collect::<Result<_, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after the durable step)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        tracing::debug!(
            aggregate = %aggregate_id,
            aggregate_type = %aggregate_type,
            events = committed.len(),
            "command committed"
        );

        Ok(committed)
    }

    /// Rehydrate an aggregate for read-only inspection.
    ///
    /// Services use this to branch on current state (duplicate-callback
    /// detection, ownership checks) before deciding which command to send.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: plaza_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(history: &[StoredEvent]) -> u64 {
    history.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    history: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last_seq = 0u64;
    for event in history {
        if event.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "stream for {aggregate_id} contains event for {}",
                    event.aggregate_id
                ),
            )));
        }
        if event.sequence_number != last_seq + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-contiguous sequence (last={last_seq}, found={})",
                    event.sequence_number
                ),
            )));
        }
        last_seq = event.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let event: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(format!("{}: {e}", stored.event_type)))?;
        aggregate.apply(&event);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use plaza_events::InMemoryEventBus;
    use plaza_orders::{Order, OrderCommand, OrderId, UpdateSellerStatus};
    use std::sync::Arc;

    type TestDispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> TestDispatcher {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    #[test]
    fn dispatching_to_a_missing_aggregate_surfaces_not_found() {
        let dispatcher = dispatcher();
        let agg = AggregateId::new();

        let result = dispatcher.dispatch::<Order>(
            agg,
            "orders.order",
            OrderCommand::UpdateSellerStatus(UpdateSellerStatus {
                order_id: OrderId::new(agg),
                seller_order_id: plaza_orders::SellerOrderId::new(AggregateId::new()),
                target: plaza_orders::OrderStatus::Paid,
                tracking: None,
                occurred_at: Utc::now(),
            }),
            |id| Order::empty(OrderId::new(id)),
        );

        assert!(matches!(result, Err(DispatchError::NotFound)));
    }

    #[test]
    fn load_of_an_empty_stream_yields_a_fresh_aggregate() {
        let dispatcher = dispatcher();
        let agg = AggregateId::new();

        let order = dispatcher
            .load::<Order>(agg, |id| Order::empty(OrderId::new(id)))
            .unwrap();
        assert!(!order.is_placed());
    }
}

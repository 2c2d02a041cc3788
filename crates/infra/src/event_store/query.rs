//! Event query interface for inspection and auditing.
//!
//! Read-only, paginated queries over the event store. Orders never get
//! deleted, so the stream doubles as the audit trail; this is how it is
//! inspected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plaza_core::AggregateId;

use crate::event_store::in_memory::InMemoryEventStore;
use crate::event_store::{EventStoreError, StoredEvent};

/// Pagination parameters for event queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of events to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria for event queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub aggregate_id: Option<AggregateId>,
    /// e.g. "orders.order".
    pub aggregate_type: Option<String>,
    /// e.g. "escrow.account.funds_held".
    pub event_type: Option<String>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

impl EventFilter {
    fn matches(&self, event: &StoredEvent) -> bool {
        if let Some(id) = self.aggregate_id {
            if event.aggregate_id != id {
                return false;
            }
        }
        if let Some(t) = &self.aggregate_type {
            if &event.aggregate_type != t {
                return false;
            }
        }
        if let Some(t) = &self.event_type {
            if &event.event_type != t {
                return false;
            }
        }
        if let Some(after) = self.occurred_after {
            if event.occurred_at <= after {
                return false;
            }
        }
        if let Some(before) = self.occurred_before {
            if event.occurred_at >= before {
                return false;
            }
        }
        true
    }
}

/// Paginated event query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQueryResult {
    pub events: Vec<StoredEvent>,
    /// Total events matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Async query interface for event inspection.
#[async_trait::async_trait]
pub trait EventQuery: Send + Sync {
    /// Query events with optional filters, most recent first.
    async fn query_events(
        &self,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError>;

    /// Get a single event by its ID.
    async fn get_event_by_id(
        &self,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError>;
}

#[async_trait::async_trait]
impl EventQuery for InMemoryEventStore {
    async fn query_events(
        &self,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        let mut matching: Vec<StoredEvent> = self
            .all_events()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        // Most recent first; sequence ascending for equal timestamps.
        matching.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then(a.sequence_number.cmp(&b.sequence_number))
        });

        let total = matching.len() as u64;
        let start = (pagination.offset as usize).min(matching.len());
        let end = (start + pagination.limit as usize).min(matching.len());
        let has_more = end < matching.len();

        Ok(EventQueryResult {
            events: matching[start..end].to_vec(),
            total,
            pagination,
            has_more,
        })
    }

    async fn get_event_by_id(
        &self,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        Ok(self.all_events().into_iter().find(|e| e.event_id == event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{EventStore, UncommittedEvent};
    use plaza_core::ExpectedVersion;
    use serde_json::json;
    use uuid::Uuid;

    fn seed(store: &InMemoryEventStore, aggregate_type: &str, n: usize) -> AggregateId {
        let agg = AggregateId::new();
        for i in 0..n {
            store
                .append(
                    vec![UncommittedEvent {
                        event_id: Uuid::now_v7(),
                        aggregate_id: agg,
                        aggregate_type: aggregate_type.to_string(),
                        event_type: format!("{aggregate_type}.event"),
                        event_version: 1,
                        occurred_at: Utc::now(),
                        payload: json!({ "i": i }),
                    }],
                    ExpectedVersion::Exact(i as u64),
                )
                .unwrap();
        }
        agg
    }

    #[tokio::test]
    async fn filter_by_aggregate_type_and_paginate() {
        let store = InMemoryEventStore::new();
        seed(&store, "orders.order", 3);
        seed(&store, "escrow.account", 2);

        let result = store
            .query_events(
                EventFilter {
                    aggregate_type: Some("orders.order".to_string()),
                    ..Default::default()
                },
                Pagination::new(Some(2), None),
            )
            .await
            .unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.events.len(), 2);
        assert!(result.has_more);
    }

    #[tokio::test]
    async fn lookup_by_event_id() {
        let store = InMemoryEventStore::new();
        let agg = seed(&store, "orders.order", 1);
        let stored = store.load_stream(agg).unwrap();

        let found = store.get_event_by_id(stored[0].event_id).await.unwrap();
        assert_eq!(found.unwrap().event_id, stored[0].event_id);

        let missing = store.get_event_by_id(Uuid::now_v7()).await.unwrap();
        assert!(missing.is_none());
    }
}

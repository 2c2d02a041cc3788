//! Append-only event store boundary.
//!
//! An infrastructure-facing abstraction for storing and loading event
//! streams without making any storage assumptions.

pub mod in_memory;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use query::{EventFilter, EventQuery, EventQueryResult, Pagination};
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

//! Read model storage abstractions (disposable, rebuildable).

pub mod store;

pub use store::{InMemoryReadStore, ReadStore};

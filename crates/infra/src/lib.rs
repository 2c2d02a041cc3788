//! Infrastructure layer: event store, command dispatch, read models,
//! settlement services and background jobs.

pub mod command_dispatcher;
pub mod event_store;
pub mod jobs;
pub mod projections;
pub mod read_model;
pub mod settlement;
pub mod workers;

#[cfg(test)]
mod integration_tests;

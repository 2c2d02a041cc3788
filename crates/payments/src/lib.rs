//! `plaza-payments` — payment selections and provider status mapping.
//!
//! A `PaymentSelection` is the provider-facing side of a checkout: one row
//! per provider reference, advanced only by payment reconciliation. Duplicate
//! and out-of-order provider callbacks are absorbed by inspecting the
//! selection's own state, never by tracking callback requests.

pub mod provider;
pub mod selection;

pub use provider::{map_provider_status, PaymentStatus};
pub use selection::{
    CreateSelection, PaymentMethod, PaymentSelection, RecordFailed, RecordPaid, RecordPending,
    RecordRefunded, SelectionCommand, SelectionEvent, SelectionId,
};

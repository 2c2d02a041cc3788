//! Settlement services: the orchestration layer over the aggregates.
//!
//! Reconciliation consumes provider callbacks, the fulfilment service moves
//! sub-orders along the lifecycle, the payout and invoicing runs batch
//! escrow entries, and the dispute service feeds refunds back into the
//! ledger. Every flow here is a sequence of idempotent commands, safe to
//! re-run from the top.

pub mod checkout;
pub mod collaborators;
pub mod config;
pub mod disputes;
pub mod fulfilment;
pub mod invoicing_run;
pub mod payout_run;
pub mod reconciliation;
pub mod registry;
pub mod snapshot;

pub use checkout::CheckoutService;
pub use collaborators::{
    CheckoutDraft, CheckoutDraftSource, DisplayNameResolver, InMemoryCheckoutDrafts,
    InMemoryPromoCodes, InMemoryShippingRules, Notification, NotificationSender, PromoCodeSource,
    RecordingNotifications, StaticDirectory, StaticShippingRules, ShippingRuleSource,
};
pub use config::SettlementConfig;
pub use disputes::DisputeService;
pub use fulfilment::FulfilmentService;
pub use invoicing_run::InvoicingRunService;
pub use payout_run::{PayoutRunReport, PayoutRunService};
pub use reconciliation::{CallbackOutcome, ProviderCallback, ReconciliationService};
pub use registry::SelectionRegistry;
pub use snapshot::{SellerStatement, SettlementSnapshot, SnapshotService};

use chrono::{DateTime, Duration, Utc};

/// Stream type identifiers, one per aggregate.
pub const AGG_ORDER: &str = "orders.order";
pub const AGG_SELECTION: &str = "payments.selection";
pub const AGG_ESCROW: &str = "escrow.account";
pub const AGG_PAYOUT: &str = "payouts.schedule";
pub const AGG_INVOICE: &str = "invoicing.invoice";
pub const AGG_DISPUTE: &str = "disputes.request";

/// The fixed-length period containing `at`, aligned to the epoch.
///
/// Deterministic: every run that observes a timestamp inside the same window
/// computes the same `[start, end)`, which is what makes derived schedule
/// and invoice ids stable.
pub fn period_containing(at: DateTime<Utc>, days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let span = days * 86_400;
    let start_ts = at.timestamp().div_euclid(span) * span;
    let start = DateTime::<Utc>::from_timestamp(start_ts, 0).expect("epoch-aligned timestamp");
    (start, start + Duration::seconds(span))
}

/// Retry wrapper for optimistic-concurrency conflicts.
///
/// A conflicting write means another worker advanced the stream between our
/// load and append; re-running re-reads the new state and usually decides
/// nothing (the no-op branch). Conflicts are surfaced, never swallowed,
/// once the attempts are exhausted.
pub(crate) fn with_conflict_retry<T>(
    mut attempt: impl FnMut() -> Result<T, crate::command_dispatcher::DispatchError>,
) -> Result<T, crate::command_dispatcher::DispatchError> {
    const MAX_ATTEMPTS: u32 = 3;

    let mut last_err = None;
    for _ in 0..MAX_ATTEMPTS {
        match attempt() {
            Err(crate::command_dispatcher::DispatchError::Concurrency(msg)) => {
                tracing::debug!(conflict = %msg, "retrying after concurrency conflict");
                last_err = Some(crate::command_dispatcher::DispatchError::Concurrency(msg));
            }
            other => return other,
        }
    }
    Err(last_err.expect("at least one attempt"))
}

//! Settlement configuration (injected policy values).

use std::sync::Arc;

use plaza_escrow::{CommissionPolicy, EscrowHoldPolicy, FlatCommissionPolicy};

/// Every tunable of the settlement engine in one place.
///
/// The API binary builds this from environment variables; tests build it
/// inline. Policy values are resolved at the moment they are stamped into
/// the ledger, so changing configuration never rewrites settled orders.
#[derive(Clone)]
pub struct SettlementConfig {
    /// Commission rate policy (flat default, optional per-seller table).
    pub commission: Arc<dyn CommissionPolicy>,
    /// Hold period anchored at delivery.
    pub escrow_hold: EscrowHoldPolicy,
    /// Payout batching window length, in days.
    pub payout_period_days: i64,
    /// Commission invoice window length, in days.
    pub invoice_period_days: i64,
}

impl SettlementConfig {
    pub fn new(commission: Arc<dyn CommissionPolicy>) -> Self {
        Self {
            commission,
            escrow_hold: EscrowHoldPolicy::new(7),
            payout_period_days: 7,
            invoice_period_days: 30,
        }
    }

    pub fn with_hold_days(mut self, days: i64) -> Self {
        self.escrow_hold = EscrowHoldPolicy::new(days);
        self
    }

    pub fn with_payout_period_days(mut self, days: i64) -> Self {
        self.payout_period_days = days;
        self
    }

    pub fn with_invoice_period_days(mut self, days: i64) -> Self {
        self.invoice_period_days = days;
        self
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        // 10% platform commission unless configured otherwise.
        Self::new(Arc::new(FlatCommissionPolicy::new(1_000)))
    }
}

impl std::fmt::Debug for SettlementConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementConfig")
            .field("escrow_hold", &self.escrow_hold)
            .field("payout_period_days", &self.payout_period_days)
            .field("invoice_period_days", &self.invoice_period_days)
            .finish_non_exhaustive()
    }
}

//! Commission and hold-period policies (injected configuration).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use plaza_core::SellerId;

/// Resolves the platform's commission rate for a seller, in basis points.
///
/// The rate is policy, not ledger data: it is resolved at the moment
/// commission is computed and stamped onto the sub-order, so later policy
/// changes never touch settled orders.
pub trait CommissionPolicy: Send + Sync {
    fn rate_bps(&self, seller_id: SellerId) -> u32;
}

/// A single platform-wide rate.
#[derive(Debug, Clone)]
pub struct FlatCommissionPolicy {
    rate_bps: u32,
}

impl FlatCommissionPolicy {
    pub fn new(rate_bps: u32) -> Self {
        Self { rate_bps }
    }
}

impl CommissionPolicy for FlatCommissionPolicy {
    fn rate_bps(&self, _seller_id: SellerId) -> u32 {
        self.rate_bps
    }
}

/// Per-seller overrides on top of a default rate.
#[derive(Debug, Clone)]
pub struct TableCommissionPolicy {
    default_bps: u32,
    overrides: HashMap<SellerId, u32>,
}

impl TableCommissionPolicy {
    pub fn new(default_bps: u32) -> Self {
        Self {
            default_bps,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, seller_id: SellerId, rate_bps: u32) -> Self {
        self.overrides.insert(seller_id, rate_bps);
        self
    }
}

impl CommissionPolicy for TableCommissionPolicy {
    fn rate_bps(&self, seller_id: SellerId) -> u32 {
        self.overrides
            .get(&seller_id)
            .copied()
            .unwrap_or(self.default_bps)
    }
}

/// How long held funds stay ineligible for payout after delivery.
#[derive(Debug, Clone, Copy)]
pub struct EscrowHoldPolicy {
    pub hold_days: i64,
}

impl EscrowHoldPolicy {
    pub fn new(hold_days: i64) -> Self {
        Self { hold_days }
    }

    /// Payout eligibility is anchored at delivery: `delivered_at + hold`.
    pub fn eligible_at(&self, delivered_at: DateTime<Utc>) -> DateTime<Utc> {
        delivered_at + Duration::days(self.hold_days)
    }
}

//! `plaza-escrow` — the escrow ledger.
//!
//! Funds collected from a buyer are held per sub-order until the seller
//! becomes eligible for payout or a refund returns them. One escrow account
//! per order, one ledger entry per sub-order, created exactly once. At every
//! point `held = commission + seller_payout` — the ledger balance invariant.

pub mod ledger;
pub mod policy;

pub use ledger::{
    ApplyEscrowRefund, EscrowAccount, EscrowCommand, EscrowEntry, EscrowEvent, EscrowStatus,
    FinalizeEligibility, HoldFunds, HoldSpec, MarkScheduled, ReleaseToSeller, ScheduleLink,
    ESCROW_NAMESPACE,
};
pub use policy::{CommissionPolicy, EscrowHoldPolicy, FlatCommissionPolicy, TableCommissionPolicy};

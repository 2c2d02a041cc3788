//! Read-side queries exposed to collaborators (UI/CLI rendering).

use std::sync::Arc;

use serde::Serialize;

use plaza_core::SellerId;
use plaza_orders::OrderId;

use crate::projections::{
    DisputeReadModel, EscrowEntryReadModel, InvoiceReadModel, OrderReadModel,
    PayoutScheduleReadModel, SharedDisputesProjection, SharedEscrowEntriesProjection,
    SharedInvoicesProjection, SharedOrdersProjection, SharedPayoutSchedulesProjection,
};
use crate::settlement::collaborators::DisplayNameResolver;

/// The full settlement picture of one order.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementSnapshot {
    pub order: OrderReadModel,
    pub buyer_name: String,
    pub escrow_entries: Vec<EscrowEntryReadModel>,
    pub payout_schedules: Vec<PayoutScheduleReadModel>,
    pub disputes: Vec<DisputeReadModel>,
}

/// A seller's payable and invoice history.
#[derive(Debug, Clone, Serialize)]
pub struct SellerStatement {
    pub seller_id: SellerId,
    pub seller_name: String,
    pub escrow_entries: Vec<EscrowEntryReadModel>,
    pub payout_schedules: Vec<PayoutScheduleReadModel>,
    pub invoices: Vec<InvoiceReadModel>,
    pub open_disputes: Vec<DisputeReadModel>,
}

pub struct SnapshotService {
    orders: SharedOrdersProjection,
    escrow_entries: SharedEscrowEntriesProjection,
    payout_schedules: SharedPayoutSchedulesProjection,
    invoices: SharedInvoicesProjection,
    disputes: SharedDisputesProjection,
    directory: Arc<dyn DisplayNameResolver>,
}

impl SnapshotService {
    pub fn new(
        orders: SharedOrdersProjection,
        escrow_entries: SharedEscrowEntriesProjection,
        payout_schedules: SharedPayoutSchedulesProjection,
        invoices: SharedInvoicesProjection,
        disputes: SharedDisputesProjection,
        directory: Arc<dyn DisplayNameResolver>,
    ) -> Self {
        Self {
            orders,
            escrow_entries,
            payout_schedules,
            invoices,
            disputes,
            directory,
        }
    }

    /// Everything known about one order's settlement.
    pub fn settlement_snapshot(&self, order_id: OrderId) -> Option<SettlementSnapshot> {
        let order = self.orders.get(&order_id)?;
        let escrow_entries = self.escrow_entries.list_for_order(order_id);
        let linked_schedules: Vec<PayoutScheduleReadModel> = escrow_entries
            .iter()
            .filter_map(|e| e.schedule_id)
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .filter_map(|id| self.payout_schedules.get(&id))
            .collect();

        // A missing display name never fails the snapshot.
        let buyer_name = self
            .directory
            .buyer_name(order.buyer_id)
            .unwrap_or_else(|| "customer".to_string());

        Some(SettlementSnapshot {
            buyer_name,
            escrow_entries,
            payout_schedules: linked_schedules,
            disputes: self.disputes.list_for_order(order_id),
            order,
        })
    }

    /// The payable/invoice history for one seller.
    pub fn seller_statement(&self, seller_id: SellerId) -> SellerStatement {
        let seller_name = self
            .directory
            .seller_name(seller_id)
            .unwrap_or_else(|| "seller".to_string());

        SellerStatement {
            seller_id,
            seller_name,
            escrow_entries: self.escrow_entries.list_for_seller(seller_id),
            payout_schedules: self.payout_schedules.list_for_seller(seller_id),
            invoices: self.invoices.list_for_seller(seller_id),
            open_disputes: self
                .disputes
                .list_for_seller(seller_id)
                .into_iter()
                .filter(|d| !d.status.is_terminal())
                .collect(),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use plaza_core::{AggregateId, BuyerId, SellerId};
use plaza_escrow::{EscrowEvent, EscrowStatus};
use plaza_events::EventEnvelope;
use plaza_orders::{OrderId, SellerOrderId};

use crate::read_model::ReadStore;
use crate::settlement::AGG_ESCROW;

use super::{EnvelopeConsumer, ProjectionApplyError, StreamCursors};

/// One escrow ledger entry, as the read side sees it.
///
/// This is the payout run's candidate index: held entries with a reached
/// eligibility date and no schedule link are what gets batched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowEntryReadModel {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub seller_id: SellerId,
    pub buyer_id: BuyerId,
    pub held_amount: u64,
    pub commission_amount: u64,
    pub seller_payout_amount: u64,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub payout_eligible_at: Option<DateTime<Utc>>,
    pub schedule_id: Option<AggregateId>,
    pub schedule_item_id: Option<Uuid>,
}

/// Projection: escrow.account events → `EscrowEntryReadModel` per sub-order.
#[derive(Debug)]
pub struct EscrowEntriesProjection<S>
where
    S: ReadStore<SellerOrderId, EscrowEntryReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> EscrowEntriesProjection<S>
where
    S: ReadStore<SellerOrderId, EscrowEntryReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, seller_order_id: &SellerOrderId) -> Option<EscrowEntryReadModel> {
        self.store.get(seller_order_id)
    }

    pub fn list_all(&self) -> Vec<EscrowEntryReadModel> {
        self.store.list()
    }

    pub fn list_for_order(&self, order_id: OrderId) -> Vec<EscrowEntryReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|e| e.order_id == order_id)
            .collect()
    }

    pub fn list_for_seller(&self, seller_id: SellerId) -> Vec<EscrowEntryReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|e| e.seller_id == seller_id)
            .collect()
    }

    /// Held entries whose eligibility date has been reached and that are not
    /// yet linked to a payout schedule item.
    pub fn payout_candidates(&self, now: DateTime<Utc>) -> Vec<EscrowEntryReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|e| {
                e.status == EscrowStatus::Held
                    && e.schedule_id.is_none()
                    && e.payout_eligible_at.map(|at| at <= now).unwrap_or(false)
            })
            .collect()
    }

    fn fold(&self, event: &EscrowEvent) {
        match event {
            EscrowEvent::FundsHeld(e) => {
                for spec in &e.entries {
                    self.store.upsert(
                        spec.seller_order_id,
                        EscrowEntryReadModel {
                            order_id: e.order_id,
                            seller_order_id: spec.seller_order_id,
                            seller_id: spec.seller_id,
                            buyer_id: e.buyer_id,
                            held_amount: spec.held_amount,
                            commission_amount: spec.commission_amount,
                            seller_payout_amount: spec.held_amount - spec.commission_amount,
                            status: EscrowStatus::Held,
                            created_at: e.occurred_at,
                            released_at: None,
                            payout_eligible_at: None,
                            schedule_id: None,
                            schedule_item_id: None,
                        },
                    );
                }
            }
            EscrowEvent::EligibilityFinalized(e) => {
                if let Some(mut entry) = self.store.get(&e.seller_order_id) {
                    entry.payout_eligible_at = Some(e.eligible_at);
                    self.store.upsert(e.seller_order_id, entry);
                }
            }
            EscrowEvent::EscrowRefundApplied(e) => {
                if let Some(mut entry) = self.store.get(&e.seller_order_id) {
                    entry.held_amount -= e.amount;
                    entry.seller_payout_amount -= e.payout_reduction;
                    entry.commission_amount -= e.commission_reduction;
                    if e.released_to_buyer {
                        entry.status = EscrowStatus::ReleasedToBuyer;
                        entry.released_at = Some(e.occurred_at);
                    }
                    self.store.upsert(e.seller_order_id, entry);
                }
            }
            EscrowEvent::EntryScheduled(e) => {
                if let Some(mut entry) = self.store.get(&e.seller_order_id) {
                    entry.schedule_id = Some(e.schedule_id);
                    entry.schedule_item_id = Some(e.item_id);
                    self.store.upsert(e.seller_order_id, entry);
                }
            }
            EscrowEvent::EntryReleasedToSeller(e) => {
                if let Some(mut entry) = self.store.get(&e.seller_order_id) {
                    entry.status = EscrowStatus::ReleasedToSeller;
                    entry.released_at = Some(e.occurred_at);
                    self.store.upsert(e.seller_order_id, entry);
                }
            }
        }
    }
}

impl<S> EnvelopeConsumer for EscrowEntriesProjection<S>
where
    S: ReadStore<SellerOrderId, EscrowEntryReadModel>,
{
    fn name(&self) -> &str {
        "escrow_entries"
    }

    fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }

    fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        if envelope.aggregate_type() != AGG_ESCROW {
            return Ok(());
        }
        if !self.cursors.advance(envelope)? {
            return Ok(());
        }

        let event: EscrowEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;
        self.fold(&event);
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use plaza_core::{BuyerId, SellerId};
use plaza_disputes::{
    Party, RefundStatus, RequestKind, RequestStatus, Resolution, ReturnRequestEvent,
    ReturnRequestId,
};
use plaza_events::EventEnvelope;
use plaza_orders::{OrderId, SellerOrderId};

use crate::read_model::ReadStore;
use crate::settlement::AGG_DISPUTE;

use super::{EnvelopeConsumer, ProjectionApplyError, StreamCursors};

/// One return/complaint request, as the read side sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisputeReadModel {
    pub request_id: ReturnRequestId,
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub reason: String,
    pub resolution: Option<Resolution>,
    pub refund_amount: Option<u64>,
    pub refund_status: Option<RefundStatus>,
    pub unread_buyer: u32,
    pub unread_seller: u32,
    pub message_count: u32,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection: disputes.request events → `DisputeReadModel`.
#[derive(Debug)]
pub struct DisputesProjection<S>
where
    S: ReadStore<ReturnRequestId, DisputeReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> DisputesProjection<S>
where
    S: ReadStore<ReturnRequestId, DisputeReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, request_id: &ReturnRequestId) -> Option<DisputeReadModel> {
        self.store.get(request_id)
    }

    pub fn list_for_seller(&self, seller_id: SellerId) -> Vec<DisputeReadModel> {
        let mut requests: Vec<DisputeReadModel> = self
            .store
            .list()
            .into_iter()
            .filter(|r| r.seller_id == seller_id)
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        requests
    }

    pub fn list_for_buyer(&self, buyer_id: BuyerId) -> Vec<DisputeReadModel> {
        let mut requests: Vec<DisputeReadModel> = self
            .store
            .list()
            .into_iter()
            .filter(|r| r.buyer_id == buyer_id)
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        requests
    }

    pub fn list_for_order(&self, order_id: OrderId) -> Vec<DisputeReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|r| r.order_id == order_id)
            .collect()
    }

    /// The open (non-terminal) request for a sub-order, if any. A sub-order
    /// carries at most one dispute at a time.
    pub fn active_for_sub_order(&self, seller_order_id: SellerOrderId) -> Option<DisputeReadModel> {
        self.store
            .list()
            .into_iter()
            .find(|r| r.seller_order_id == seller_order_id && !r.status.is_terminal())
    }

    fn fold(&self, event: &ReturnRequestEvent) {
        match event {
            ReturnRequestEvent::RequestOpened(e) => {
                self.store.upsert(
                    e.request_id,
                    DisputeReadModel {
                        request_id: e.request_id,
                        order_id: e.order_id,
                        seller_order_id: e.seller_order_id,
                        buyer_id: e.buyer_id,
                        seller_id: e.seller_id,
                        kind: e.kind,
                        status: RequestStatus::Requested,
                        reason: e.reason.clone(),
                        resolution: None,
                        refund_amount: None,
                        refund_status: None,
                        unread_buyer: 0,
                        unread_seller: 0,
                        message_count: 0,
                        requested_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            ReturnRequestEvent::SellerDecided(e) => {
                if let Some(mut model) = self.store.get(&e.request_id) {
                    model.status = e.status;
                    model.updated_at = e.occurred_at;
                    self.store.upsert(e.request_id, model);
                }
            }
            ReturnRequestEvent::RequestResolved(e) => {
                if let Some(mut model) = self.store.get(&e.request_id) {
                    model.status = RequestStatus::Completed;
                    model.resolution = Some(e.resolution);
                    model.refund_amount = e.refund_amount;
                    model.refund_status = if e.resolution.requires_refund_amount() {
                        Some(RefundStatus::Pending)
                    } else {
                        None
                    };
                    model.updated_at = e.occurred_at;
                    self.store.upsert(e.request_id, model);
                }
            }
            ReturnRequestEvent::RefundConfirmed(e) => {
                if let Some(mut model) = self.store.get(&e.request_id) {
                    model.refund_status = Some(RefundStatus::Completed);
                    model.updated_at = e.occurred_at;
                    self.store.upsert(e.request_id, model);
                }
            }
            ReturnRequestEvent::MessagePosted(e) => {
                if let Some(mut model) = self.store.get(&e.request_id) {
                    model.message_count += 1;
                    match e.author {
                        Party::Buyer => model.unread_seller += 1,
                        Party::Seller => model.unread_buyer += 1,
                    }
                    model.updated_at = e.occurred_at;
                    self.store.upsert(e.request_id, model);
                }
            }
            ReturnRequestEvent::ThreadRead(e) => {
                if let Some(mut model) = self.store.get(&e.request_id) {
                    match e.party {
                        Party::Buyer => model.unread_buyer = 0,
                        Party::Seller => model.unread_seller = 0,
                    }
                    self.store.upsert(e.request_id, model);
                }
            }
        }
    }
}

impl<S> EnvelopeConsumer for DisputesProjection<S>
where
    S: ReadStore<ReturnRequestId, DisputeReadModel>,
{
    fn name(&self) -> &str {
        "disputes"
    }

    fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }

    fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        if envelope.aggregate_type() != AGG_DISPUTE {
            return Ok(());
        }
        if !self.cursors.advance(envelope)? {
            return Ok(());
        }

        let event: ReturnRequestEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;
        self.fold(&event);
        Ok(())
    }
}

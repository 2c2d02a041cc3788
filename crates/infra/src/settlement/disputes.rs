//! Return/complaint orchestration.
//!
//! The workflow aggregate owns the state machine; this service owns the
//! cross-aggregate consequences. A refund resolution reduces the escrow
//! entry's held funds and the sub-order's refunded amount, both keyed by the
//! request id (`refund_ref`), so re-running a half-finished resolution
//! finishes it instead of refunding twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use plaza_core::money::Amount;
use plaza_core::{AggregateId, BuyerId, SellerId};
use plaza_disputes::{
    ConfirmRefund, MarkRead, OpenRequest, Party, PostMessage, RequestKind, RequestStatus,
    Resolution, Resolve, ReturnRequest, ReturnRequestCommand, ReturnRequestId, SellerDecide,
    SellerDecision,
};
use plaza_escrow::{ApplyEscrowRefund, EscrowAccount, EscrowCommand, EscrowStatus};
use plaza_events::{EventBus, EventEnvelope};
use plaza_orders::{ApplyRefund, Order, OrderCommand, OrderId, OrderStatus, SellerOrderId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::SharedDisputesProjection;
use crate::settlement::{with_conflict_retry, AGG_DISPUTE, AGG_ESCROW, AGG_ORDER};

pub struct DisputeService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    disputes: SharedDisputesProjection,
}

impl<S, B> DisputeService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        disputes: SharedDisputesProjection,
    ) -> Self {
        Self { dispatcher, disputes }
    }

    /// A buyer opens a return or complaint against a delivered sub-order.
    pub fn open_request(
        &self,
        actor: BuyerId,
        order_id: OrderId,
        seller_order_id: SellerOrderId,
        kind: RequestKind,
        reason: String,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReturnRequestId, DispatchError> {
        let order = self.load_order(order_id)?;
        if !order.is_placed() {
            return Err(DispatchError::NotFound);
        }
        if order.buyer_id() != Some(actor) {
            return Err(DispatchError::Forbidden);
        }
        let sub = order
            .seller_order(seller_order_id)
            .ok_or(DispatchError::NotFound)?;
        if sub.status() != OrderStatus::Delivered {
            return Err(DispatchError::InvalidTransition(
                "returns and complaints open after delivery".to_string(),
            ));
        }
        if self.disputes.active_for_sub_order(seller_order_id).is_some() {
            return Err(DispatchError::Concurrency(
                "a request is already open for this sub-order".to_string(),
            ));
        }

        let request_id = ReturnRequestId::new(AggregateId::new());
        self.dispatcher.dispatch::<ReturnRequest>(
            request_id.0,
            AGG_DISPUTE,
            ReturnRequestCommand::OpenRequest(OpenRequest {
                request_id,
                order_id,
                seller_order_id,
                buyer_id: actor,
                seller_id: sub.seller_id(),
                kind,
                reason,
                description,
                occurred_at: now,
            }),
            |id| ReturnRequest::empty(ReturnRequestId::new(id)),
        )?;

        tracing::info!(%request_id, %order_id, %seller_order_id, "return request opened");
        Ok(request_id)
    }

    /// The seller's decision on a freshly requested return.
    pub fn decide(
        &self,
        actor: SellerId,
        request_id: ReturnRequestId,
        decision: SellerDecision,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<ReturnRequest>(
                    request_id.0,
                    AGG_DISPUTE,
                    ReturnRequestCommand::SellerDecide(SellerDecide {
                        request_id,
                        actor,
                        decision,
                        note: note.clone(),
                        occurred_at: now,
                    }),
                    |id| ReturnRequest::empty(ReturnRequestId::new(id)),
                )
                .map(|_| ())
        })
    }

    /// Resolve the request. Refund resolutions move money: escrow held funds
    /// shrink by the refund and the sub-order's refunded amount grows by the
    /// same, exactly once per request.
    pub fn resolve(
        &self,
        actor: SellerId,
        request_id: ReturnRequestId,
        resolution: Resolution,
        refund_amount: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            let request = self.load_request(request_id)?;
            if request.seller_id() != Some(actor) {
                return Err(DispatchError::Forbidden);
            }

            if request.status() != RequestStatus::Completed {
                if resolution.requires_refund_amount() {
                    let amount = refund_amount.ok_or_else(|| {
                        DispatchError::Validation(
                            "refund resolutions require a refund amount".to_string(),
                        )
                    })?;
                    self.check_refund_bounds(&request, amount)?;
                }

                self.dispatcher.dispatch::<ReturnRequest>(
                    request_id.0,
                    AGG_DISPUTE,
                    ReturnRequestCommand::Resolve(Resolve {
                        request_id,
                        actor,
                        resolution,
                        refund_amount,
                        occurred_at: now,
                    }),
                    |id| ReturnRequest::empty(ReturnRequestId::new(id)),
                )?;
            }

            // Re-read so a replayed call applies the originally recorded
            // resolution, not the caller's arguments.
            let request = self.load_request(request_id)?;
            self.apply_refund_effects(&request, now)
        })
    }

    /// The external refund transfer completed.
    pub fn confirm_refund(
        &self,
        request_id: ReturnRequestId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<ReturnRequest>(
                    request_id.0,
                    AGG_DISPUTE,
                    ReturnRequestCommand::ConfirmRefund(ConfirmRefund {
                        request_id,
                        occurred_at: now,
                    }),
                    |id| ReturnRequest::empty(ReturnRequestId::new(id)),
                )
                .map(|_| ())
        })
    }

    pub fn post_message_as_buyer(
        &self,
        actor: BuyerId,
        request_id: ReturnRequestId,
        body: String,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let request = self.load_request(request_id)?;
        if request.buyer_id() != Some(actor) {
            return Err(DispatchError::Forbidden);
        }
        self.post_message(request_id, Party::Buyer, body, now)
    }

    pub fn post_message_as_seller(
        &self,
        actor: SellerId,
        request_id: ReturnRequestId,
        body: String,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let request = self.load_request(request_id)?;
        if request.seller_id() != Some(actor) {
            return Err(DispatchError::Forbidden);
        }
        self.post_message(request_id, Party::Seller, body, now)
    }

    pub fn mark_read_as_buyer(
        &self,
        actor: BuyerId,
        request_id: ReturnRequestId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let request = self.load_request(request_id)?;
        if request.buyer_id() != Some(actor) {
            return Err(DispatchError::Forbidden);
        }
        self.mark_read(request_id, Party::Buyer, now)
    }

    pub fn mark_read_as_seller(
        &self,
        actor: SellerId,
        request_id: ReturnRequestId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let request = self.load_request(request_id)?;
        if request.seller_id() != Some(actor) {
            return Err(DispatchError::Forbidden);
        }
        self.mark_read(request_id, Party::Seller, now)
    }

    fn post_message(
        &self,
        request_id: ReturnRequestId,
        author: Party,
        body: String,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<ReturnRequest>(
                    request_id.0,
                    AGG_DISPUTE,
                    ReturnRequestCommand::PostMessage(PostMessage {
                        request_id,
                        author,
                        body: body.clone(),
                        occurred_at: now,
                    }),
                    |id| ReturnRequest::empty(ReturnRequestId::new(id)),
                )
                .map(|_| ())
        })
    }

    fn mark_read(
        &self,
        request_id: ReturnRequestId,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<ReturnRequest>(
                    request_id.0,
                    AGG_DISPUTE,
                    ReturnRequestCommand::MarkRead(MarkRead {
                        request_id,
                        party,
                        occurred_at: now,
                    }),
                    |id| ReturnRequest::empty(ReturnRequestId::new(id)),
                )
                .map(|_| ())
        })
    }

    /// Refunds must fit both the sub-order's refundable balance and the
    /// escrow entry's held funds.
    fn check_refund_bounds(
        &self,
        request: &ReturnRequest,
        amount: Amount,
    ) -> Result<(), DispatchError> {
        let order_id = request.order_id().ok_or(DispatchError::NotFound)?;
        let seller_order_id = request.seller_order_id().ok_or(DispatchError::NotFound)?;

        let order = self.load_order(order_id)?;
        let sub = order
            .seller_order(seller_order_id)
            .ok_or(DispatchError::NotFound)?;
        if amount > sub.refundable() {
            return Err(DispatchError::InvariantViolation(
                "refund exceeds the sub-order's remaining refundable balance".to_string(),
            ));
        }

        let account = self
            .dispatcher
            .load::<EscrowAccount>(EscrowAccount::account_id_for(order_id), EscrowAccount::empty)?;
        let entry = account
            .entry(seller_order_id)
            .ok_or(DispatchError::NotFound)?;
        if entry.status() != EscrowStatus::Held {
            return Err(DispatchError::InvariantViolation(
                "held funds were already released; the refund needs manual settlement".to_string(),
            ));
        }
        if amount > entry.held_amount() {
            return Err(DispatchError::InvariantViolation(
                "refund exceeds the escrow entry's held funds".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the ledger consequences of a completed refund resolution.
    /// Both commands carry the request id as `refund_ref`, so each applies
    /// at most once however often this runs.
    fn apply_refund_effects(
        &self,
        request: &ReturnRequest,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let Some(resolution) = request.resolution() else {
            return Ok(());
        };
        if !resolution.requires_refund_amount() {
            return Ok(());
        }
        let Some(amount) = request.refund_amount() else {
            return Ok(());
        };
        let order_id = request.order_id().ok_or(DispatchError::NotFound)?;
        let seller_order_id = request.seller_order_id().ok_or(DispatchError::NotFound)?;
        let refund_ref = Some(*request.id_typed().0.as_uuid());

        self.dispatcher.dispatch::<EscrowAccount>(
            EscrowAccount::account_id_for(order_id),
            AGG_ESCROW,
            EscrowCommand::ApplyEscrowRefund(ApplyEscrowRefund {
                seller_order_id,
                amount,
                refund_ref,
                occurred_at: now,
            }),
            EscrowAccount::empty,
        )?;

        self.dispatcher.dispatch::<Order>(
            order_id.0,
            AGG_ORDER,
            OrderCommand::ApplyRefund(ApplyRefund {
                order_id,
                seller_order_id,
                amount,
                refund_ref,
                occurred_at: now,
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        tracing::info!(
            request = %request.id_typed(),
            %order_id,
            %seller_order_id,
            amount,
            "refund applied to escrow and order"
        );
        Ok(())
    }

    fn load_order(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        self.dispatcher
            .load::<Order>(order_id.0, |id| Order::empty(OrderId::new(id)))
    }

    fn load_request(&self, request_id: ReturnRequestId) -> Result<ReturnRequest, DispatchError> {
        let request = self.dispatcher.load::<ReturnRequest>(request_id.0, |id| {
            ReturnRequest::empty(ReturnRequestId::new(id))
        })?;
        if !request.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(request)
    }
}

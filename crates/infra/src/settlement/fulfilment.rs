//! Sub-order fulfilment: status updates and the delivery hook.
//!
//! Sellers move their slice through the lifecycle; buyers may cancel before
//! it ships. Delivery finalizes the escrow entry's payout-eligibility date
//! (delivery + hold period). All ownership checks live here — status never
//! changes through ad hoc writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use plaza_core::{BuyerId, SellerId};
use plaza_escrow::{EscrowAccount, EscrowCommand, FinalizeEligibility};
use plaza_events::{EventBus, EventEnvelope};
use plaza_orders::{
    Order, OrderCommand, OrderId, OrderStatus, SellerOrderId, Tracking, UpdateSellerStatus,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::settlement::config::SettlementConfig;
use crate::settlement::{with_conflict_retry, AGG_ESCROW, AGG_ORDER};

pub struct FulfilmentService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    config: SettlementConfig,
}

impl<S, B> FulfilmentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, config: SettlementConfig) -> Self {
        Self { dispatcher, config }
    }

    /// A seller moves their own sub-order along the lifecycle.
    pub fn seller_update_status(
        &self,
        actor: SellerId,
        order_id: OrderId,
        seller_order_id: SellerOrderId,
        target: OrderStatus,
        tracking: Option<Tracking>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            let order = self.load_order(order_id)?;
            let sub = order
                .seller_order(seller_order_id)
                .ok_or(DispatchError::NotFound)?;
            if sub.seller_id() != actor {
                return Err(DispatchError::Forbidden);
            }

            self.update_status(order_id, seller_order_id, target, tracking.clone(), now)
        })
    }

    /// A buyer cancels their own not-yet-shipped sub-order.
    pub fn buyer_cancel(
        &self,
        actor: BuyerId,
        order_id: OrderId,
        seller_order_id: SellerOrderId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            let order = self.load_order(order_id)?;
            if order.buyer_id() != Some(actor) {
                return Err(DispatchError::Forbidden);
            }
            if order.seller_order(seller_order_id).is_none() {
                return Err(DispatchError::NotFound);
            }

            self.update_status(order_id, seller_order_id, OrderStatus::Cancelled, None, now)
        })
    }

    fn update_status(
        &self,
        order_id: OrderId,
        seller_order_id: SellerOrderId,
        target: OrderStatus,
        tracking: Option<Tracking>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch::<Order>(
            order_id.0,
            AGG_ORDER,
            OrderCommand::UpdateSellerStatus(UpdateSellerStatus {
                order_id,
                seller_order_id,
                target,
                tracking,
                occurred_at: now,
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        if target == OrderStatus::Delivered {
            self.finalize_escrow_eligibility(order_id, seller_order_id, now)?;
        }

        Ok(())
    }

    /// Delivery anchors the payout hold: `eligible_at = delivered + hold`.
    fn finalize_escrow_eligibility(
        &self,
        order_id: OrderId,
        seller_order_id: SellerOrderId,
        delivered_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let account_id = EscrowAccount::account_id_for(order_id);
        let result = self.dispatcher.dispatch::<EscrowAccount>(
            account_id,
            AGG_ESCROW,
            EscrowCommand::FinalizeEligibility(FinalizeEligibility {
                seller_order_id,
                eligible_at: self.config.escrow_hold.eligible_at(delivered_at),
                occurred_at: delivered_at,
            }),
            EscrowAccount::empty,
        );

        match result {
            Ok(_) => Ok(()),
            // No escrow account can only mean the order never reached Paid;
            // the delivery status still stands, eligibility simply has
            // nothing to attach to.
            Err(DispatchError::NotFound) => {
                tracing::warn!(%order_id, %seller_order_id, "delivered without an escrow account");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    fn load_order(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        self.dispatcher
            .load::<Order>(order_id.0, |id| Order::empty(OrderId::new(id)))
    }
}

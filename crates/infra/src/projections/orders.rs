use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use plaza_core::{BuyerId, SellerId};
use plaza_events::EventEnvelope;
use plaza_orders::{
    aggregate_status, OrderEvent, OrderId, OrderStatus, SellerOrderId, Tracking,
};

use crate::read_model::ReadStore;
use crate::settlement::AGG_ORDER;

use super::{EnvelopeConsumer, ProjectionApplyError, StreamCursors};

/// One seller's slice, as the read side sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellerOrderReadModel {
    pub seller_order_id: SellerOrderId,
    pub seller_id: SellerId,
    pub seller_name: String,
    pub status: OrderStatus,
    pub subtotal: u64,
    pub shipping: u64,
    pub discount: u64,
    pub total: u64,
    pub refunded: u64,
    pub commission_rate_bps: u32,
    pub commission_amount: u64,
    pub commission_calculated_at: Option<DateTime<Utc>>,
    pub tracking: Option<Tracking>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Buyer-facing order summary with its per-seller slices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderReadModel {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub overall_status: OrderStatus,
    pub items_subtotal: u64,
    pub shipping_total: u64,
    pub discount_total: u64,
    pub total_amount: u64,
    pub refunded_amount: u64,
    pub commission_total: u64,
    pub promo_code: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sellers: Vec<SellerOrderReadModel>,
}

impl OrderReadModel {
    fn recompute_overall(&mut self) {
        let statuses: Vec<OrderStatus> = self.sellers.iter().map(|s| s.status).collect();
        self.overall_status = aggregate_status(&statuses);
    }
}

/// Projection: orders.order events → `OrderReadModel`.
#[derive(Debug)]
pub struct OrdersProjection<S>
where
    S: ReadStore<OrderId, OrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrdersProjection<S>
where
    S: ReadStore<OrderId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<OrderReadModel> {
        self.store.get(order_id)
    }

    pub fn list(&self) -> Vec<OrderReadModel> {
        self.store.list()
    }

    pub fn list_for_buyer(&self, buyer_id: BuyerId) -> Vec<OrderReadModel> {
        let mut orders: Vec<OrderReadModel> = self
            .store
            .list()
            .into_iter()
            .filter(|o| o.buyer_id == buyer_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    pub fn list_for_seller(&self, seller_id: SellerId) -> Vec<OrderReadModel> {
        let mut orders: Vec<OrderReadModel> = self
            .store
            .list()
            .into_iter()
            .filter(|o| o.sellers.iter().any(|s| s.seller_id == seller_id))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    fn fold(&self, order_id: OrderId, event: &OrderEvent) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                let status = e.payment.initial_status();
                let mut model = OrderReadModel {
                    order_id: e.order_id,
                    buyer_id: e.buyer_id,
                    overall_status: status,
                    items_subtotal: e.items_subtotal,
                    shipping_total: e.shipping_total,
                    discount_total: e.discount_total,
                    total_amount: e.total_amount,
                    refunded_amount: 0,
                    commission_total: 0,
                    promo_code: e.promo_code.clone(),
                    failure_reason: e.failure_reason.clone(),
                    created_at: e.occurred_at,
                    sellers: e
                        .seller_orders
                        .iter()
                        .map(|d| SellerOrderReadModel {
                            seller_order_id: d.seller_order_id,
                            seller_id: d.seller_id,
                            seller_name: d.seller_name.clone(),
                            status,
                            subtotal: d.subtotal,
                            shipping: d.shipping,
                            discount: d.discount,
                            total: d.total,
                            refunded: 0,
                            commission_rate_bps: 0,
                            commission_amount: 0,
                            commission_calculated_at: None,
                            tracking: None,
                            delivered_at: None,
                        })
                        .collect(),
                };
                model.recompute_overall();
                self.store.upsert(order_id, model);
            }
            OrderEvent::OrderPaid(_) => {
                if let Some(mut model) = self.store.get(&order_id) {
                    for seller in &mut model.sellers {
                        if seller.status == OrderStatus::New {
                            seller.status = OrderStatus::Paid;
                        }
                    }
                    model.recompute_overall();
                    self.store.upsert(order_id, model);
                }
            }
            OrderEvent::SellerOrderStatusChanged(e) => {
                if let Some(mut model) = self.store.get(&order_id) {
                    if let Some(seller) = model
                        .sellers
                        .iter_mut()
                        .find(|s| s.seller_order_id == e.seller_order_id)
                    {
                        seller.status = e.to;
                        if let Some(tracking) = &e.tracking {
                            seller.tracking = Some(tracking.clone());
                        }
                        if e.to == OrderStatus::Delivered {
                            seller.delivered_at = Some(e.occurred_at);
                        }
                    }
                    model.recompute_overall();
                    self.store.upsert(order_id, model);
                }
            }
            OrderEvent::CommissionCalculated(e) => {
                if let Some(mut model) = self.store.get(&order_id) {
                    if let Some(seller) = model
                        .sellers
                        .iter_mut()
                        .find(|s| s.seller_order_id == e.seller_order_id)
                    {
                        seller.commission_rate_bps = e.rate_bps;
                        seller.commission_amount = e.amount;
                        seller.commission_calculated_at = Some(e.occurred_at);
                    }
                    model.commission_total += e.amount;
                    self.store.upsert(order_id, model);
                }
            }
            OrderEvent::RefundApplied(e) => {
                if let Some(mut model) = self.store.get(&order_id) {
                    if let Some(seller) = model
                        .sellers
                        .iter_mut()
                        .find(|s| s.seller_order_id == e.seller_order_id)
                    {
                        seller.refunded += e.amount;
                    }
                    model.refunded_amount += e.amount;
                    self.store.upsert(order_id, model);
                }
            }
        }
    }
}

impl<S> EnvelopeConsumer for OrdersProjection<S>
where
    S: ReadStore<OrderId, OrderReadModel>,
{
    fn name(&self) -> &str {
        "orders"
    }

    fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }

    fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        if envelope.aggregate_type() != AGG_ORDER {
            return Ok(());
        }
        if !self.cursors.advance(envelope)? {
            return Ok(());
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;
        self.fold(OrderId::new(envelope.aggregate_id()), &event);
        Ok(())
    }
}

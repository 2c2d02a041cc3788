use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plaza_core::money::{bps_share, line_total, Amount};
use plaza_core::{
    Aggregate, AggregateId, AggregateRoot, BuyerId, DomainError, Entity, SellerId, ValueObject,
};
use plaza_events::Event;

use crate::status::{aggregate_status, OrderStatus};

/// Buyer-facing order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of one seller's slice of an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SellerOrderId(pub AggregateId);

impl SellerOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SellerOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Delivery address, frozen at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl ValueObject for AddressSnapshot {}

impl AddressSnapshot {
    fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.recipient.trim().is_empty() {
            issues.push("delivery address is missing a recipient".to_string());
        }
        if self.line1.trim().is_empty() || self.city.trim().is_empty() {
            issues.push("delivery address is incomplete".to_string());
        }
        if self.country.trim().is_empty() {
            issues.push("delivery address is missing a country".to_string());
        }
        issues
    }
}

/// Order line: name/price/quantity snapshot, immune to later catalog edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub line_no: u32,
    pub product_name: String,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: Amount,
    pub quantity: i64,
}

/// Shipment tracking details set by the seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracking {
    pub carrier: String,
    pub tracking_number: String,
}

impl ValueObject for Tracking {}

/// The buyer's shipping choice for one seller, with its snapshotted cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingSelection {
    pub seller_id: SellerId,
    pub method: String,
    pub cost: Amount,
}

/// The payment disposition an order is placed under.
///
/// Orders only come into existence through payment reconciliation, so the
/// initial sub-order status depends on what the provider reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentDisposition {
    Pending,
    Paid,
    Failed,
}

impl PaymentDisposition {
    pub fn initial_status(self) -> OrderStatus {
        match self {
            PaymentDisposition::Pending => OrderStatus::New,
            PaymentDisposition::Paid => OrderStatus::Paid,
            PaymentDisposition::Failed => OrderStatus::Failed,
        }
    }
}

/// Placement-time snapshot of one seller's slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerOrderDraft {
    pub seller_order_id: SellerOrderId,
    pub seller_id: SellerId,
    pub seller_name: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Amount,
    pub shipping: Amount,
    pub discount: Amount,
    pub total: Amount,
}

/// One seller's slice of the order; exclusively owned by its `Order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerOrder {
    id: SellerOrderId,
    seller_id: SellerId,
    seller_name: String,
    items: Vec<OrderItem>,
    subtotal: Amount,
    shipping: Amount,
    discount: Amount,
    total: Amount,
    refunded: Amount,
    refund_refs: Vec<Uuid>,
    commission_rate_bps: u32,
    commission_amount: Amount,
    /// `None` means "not yet computed" — the exactly-once sentinel.
    commission_calculated_at: Option<DateTime<Utc>>,
    status: OrderStatus,
    tracking: Option<Tracking>,
    delivered_at: Option<DateTime<Utc>>,
}

impl Entity for SellerOrder {
    type Id = SellerOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SellerOrder {
    fn from_draft(draft: &SellerOrderDraft, status: OrderStatus) -> Self {
        Self {
            id: draft.seller_order_id,
            seller_id: draft.seller_id,
            seller_name: draft.seller_name.clone(),
            items: draft.items.clone(),
            subtotal: draft.subtotal,
            shipping: draft.shipping,
            discount: draft.discount,
            total: draft.total,
            refunded: 0,
            refund_refs: Vec::new(),
            commission_rate_bps: 0,
            commission_amount: 0,
            commission_calculated_at: None,
            status,
            tracking: None,
            delivered_at: None,
        }
    }

    pub fn id_typed(&self) -> SellerOrderId {
        self.id
    }

    pub fn seller_id(&self) -> SellerId {
        self.seller_id
    }

    pub fn seller_name(&self) -> &str {
        &self.seller_name
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Amount {
        self.subtotal
    }

    pub fn shipping(&self) -> Amount {
        self.shipping
    }

    pub fn discount(&self) -> Amount {
        self.discount
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn refunded(&self) -> Amount {
        self.refunded
    }

    pub fn refundable(&self) -> Amount {
        self.total.saturating_sub(self.refunded)
    }

    pub fn commission_rate_bps(&self) -> u32 {
        self.commission_rate_bps
    }

    pub fn commission_amount(&self) -> Amount {
        self.commission_amount
    }

    pub fn commission_calculated_at(&self) -> Option<DateTime<Utc>> {
        self.commission_calculated_at
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn tracking(&self) -> Option<&Tracking> {
        self.tracking.as_ref()
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }
}

/// Aggregate root: Order.
///
/// Created once at placement, never deleted (orders are the audit trail).
/// The overall status is always derived from the sub-orders via
/// [`aggregate_status`]; it is not stored as independent truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    buyer_id: Option<BuyerId>,
    address: Option<AddressSnapshot>,
    promo_code: Option<String>,
    failure_reason: Option<String>,
    items_subtotal: Amount,
    shipping_total: Amount,
    discount_total: Amount,
    total_amount: Amount,
    refunded_amount: Amount,
    commission_total: Amount,
    created_at: Option<DateTime<Utc>>,
    shipping_selections: Vec<ShippingSelection>,
    seller_orders: Vec<SellerOrder>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            buyer_id: None,
            address: None,
            promo_code: None,
            failure_reason: None,
            items_subtotal: 0,
            shipping_total: 0,
            discount_total: 0,
            total_amount: 0,
            refunded_amount: 0,
            commission_total: 0,
            created_at: None,
            shipping_selections: Vec::new(),
            seller_orders: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn address(&self) -> Option<&AddressSnapshot> {
        self.address.as_ref()
    }

    pub fn promo_code(&self) -> Option<&str> {
        self.promo_code.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn items_subtotal(&self) -> Amount {
        self.items_subtotal
    }

    pub fn shipping_total(&self) -> Amount {
        self.shipping_total
    }

    pub fn discount_total(&self) -> Amount {
        self.discount_total
    }

    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    pub fn refunded_amount(&self) -> Amount {
        self.refunded_amount
    }

    pub fn commission_total(&self) -> Amount {
        self.commission_total
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn shipping_selections(&self) -> &[ShippingSelection] {
        &self.shipping_selections
    }

    pub fn seller_orders(&self) -> &[SellerOrder] {
        &self.seller_orders
    }

    pub fn seller_order(&self, id: SellerOrderId) -> Option<&SellerOrder> {
        self.seller_orders.iter().find(|s| s.id == id)
    }

    /// Buyer-visible overall status, derived from the sub-orders.
    pub fn overall_status(&self) -> OrderStatus {
        let statuses: Vec<OrderStatus> = self.seller_orders.iter().map(|s| s.status).collect();
        aggregate_status(&statuses)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
///
/// Carries the priced snapshot produced by the checkout calculator; the
/// aggregate re-checks the arithmetic so a bad snapshot can never be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub address: AddressSnapshot,
    pub promo_code: Option<String>,
    pub payment: PaymentDisposition,
    pub failure_reason: Option<String>,
    pub seller_orders: Vec<SellerOrderDraft>,
    pub shipping_selections: Vec<ShippingSelection>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPaid (a pending order's payment arrived).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateSellerStatus (one sub-order moves along the lifecycle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSellerStatus {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub target: OrderStatus,
    pub tracking: Option<Tracking>,
    pub occurred_at: DateTime<Utc>,
}

/// Commission rate resolved for one sub-order (policy lives in the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerCommissionRate {
    pub seller_order_id: SellerOrderId,
    pub rate_bps: u32,
}

/// Command: ComputeCommission.
///
/// Stamps `commission_calculated_at` on every sub-order that does not carry
/// it yet; already-stamped sub-orders are left untouched, so replays decide
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeCommission {
    pub order_id: OrderId,
    pub rates: Vec<SellerCommissionRate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyRefund (from the dispute workflow or a provider refund).
///
/// `refund_ref` is the natural key of the refund (the resolved return
/// request). A ref the sub-order already carries decides nothing, which is
/// what lets the dispute flow re-run after a crash without paying twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRefund {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub amount: Amount,
    pub refund_ref: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    MarkPaid(MarkPaid),
    UpdateSellerStatus(UpdateSellerStatus),
    ComputeCommission(ComputeCommission),
    ApplyRefund(ApplyRefund),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub address: AddressSnapshot,
    pub promo_code: Option<String>,
    pub payment: PaymentDisposition,
    pub failure_reason: Option<String>,
    pub seller_orders: Vec<SellerOrderDraft>,
    pub shipping_selections: Vec<ShippingSelection>,
    pub items_subtotal: Amount,
    pub shipping_total: Amount,
    pub discount_total: Amount,
    pub total_amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderPaid (all pending sub-orders move New → Paid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SellerOrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerOrderStatusChanged {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub tracking: Option<Tracking>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CommissionCalculated (exactly once per sub-order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionCalculated {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub rate_bps: u32,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundApplied {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub amount: Amount,
    pub refund_ref: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderPaid(OrderPaid),
    SellerOrderStatusChanged(SellerOrderStatusChanged),
    CommissionCalculated(CommissionCalculated),
    RefundApplied(RefundApplied),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderPaid(_) => "orders.order.paid",
            OrderEvent::SellerOrderStatusChanged(_) => "orders.seller_order.status_changed",
            OrderEvent::CommissionCalculated(_) => "orders.seller_order.commission_calculated",
            OrderEvent::RefundApplied(_) => "orders.seller_order.refund_applied",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderPaid(e) => e.occurred_at,
            OrderEvent::SellerOrderStatusChanged(e) => e.occurred_at,
            OrderEvent::CommissionCalculated(e) => e.occurred_at,
            OrderEvent::RefundApplied(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                let status = e.payment.initial_status();
                self.id = e.order_id;
                self.buyer_id = Some(e.buyer_id);
                self.address = Some(e.address.clone());
                self.promo_code = e.promo_code.clone();
                self.failure_reason = e.failure_reason.clone();
                self.items_subtotal = e.items_subtotal;
                self.shipping_total = e.shipping_total;
                self.discount_total = e.discount_total;
                self.total_amount = e.total_amount;
                self.refunded_amount = 0;
                self.commission_total = 0;
                self.created_at = Some(e.occurred_at);
                self.shipping_selections = e.shipping_selections.clone();
                self.seller_orders = e
                    .seller_orders
                    .iter()
                    .map(|d| SellerOrder::from_draft(d, status))
                    .collect();
                self.created = true;
            }
            OrderEvent::OrderPaid(_) => {
                for sub in &mut self.seller_orders {
                    if sub.status == OrderStatus::New {
                        sub.status = OrderStatus::Paid;
                    }
                }
            }
            OrderEvent::SellerOrderStatusChanged(e) => {
                if let Some(sub) = self
                    .seller_orders
                    .iter_mut()
                    .find(|s| s.id == e.seller_order_id)
                {
                    sub.status = e.to;
                    if let Some(tracking) = &e.tracking {
                        sub.tracking = Some(tracking.clone());
                    }
                    if e.to == OrderStatus::Delivered {
                        sub.delivered_at = Some(e.occurred_at);
                    }
                }
            }
            OrderEvent::CommissionCalculated(e) => {
                if let Some(sub) = self
                    .seller_orders
                    .iter_mut()
                    .find(|s| s.id == e.seller_order_id)
                {
                    sub.commission_rate_bps = e.rate_bps;
                    sub.commission_amount = e.amount;
                    sub.commission_calculated_at = Some(e.occurred_at);
                }
                self.commission_total += e.amount;
            }
            OrderEvent::RefundApplied(e) => {
                if let Some(sub) = self
                    .seller_orders
                    .iter_mut()
                    .find(|s| s.id == e.seller_order_id)
                {
                    sub.refunded += e.amount;
                    if let Some(refund_ref) = e.refund_ref {
                        sub.refund_refs.push(refund_ref);
                    }
                }
                self.refunded_amount += e.amount;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            OrderCommand::UpdateSellerStatus(cmd) => self.handle_update_status(cmd),
            OrderCommand::ComputeCommission(cmd) => self.handle_compute_commission(cmd),
            OrderCommand::ApplyRefund(cmd) => self.handle_apply_refund(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already placed"));
        }

        let mut issues: Vec<String> = Vec::new();
        issues.extend(cmd.address.issues());

        if cmd.seller_orders.is_empty() {
            issues.push("cart is empty".to_string());
        }

        let mut items_subtotal: Amount = 0;
        let mut shipping_total: Amount = 0;
        let mut discount_total: Amount = 0;
        let mut total_amount: Amount = 0;

        for draft in &cmd.seller_orders {
            if cmd
                .seller_orders
                .iter()
                .filter(|d| d.seller_id == draft.seller_id)
                .count()
                > 1
            {
                issues.push(format!(
                    "seller {} appears more than once",
                    draft.seller_id
                ));
            }
            if draft.items.is_empty() {
                issues.push(format!("no items for seller {}", draft.seller_id));
            }
            if !cmd
                .shipping_selections
                .iter()
                .any(|s| s.seller_id == draft.seller_id)
            {
                issues.push(format!(
                    "no shipping selection for seller {}",
                    draft.seller_id
                ));
            }

            let mut subtotal: Amount = 0;
            for item in &draft.items {
                match line_total(item.unit_price, item.quantity) {
                    Ok(t) => subtotal += t,
                    Err(e) => issues.push(format!("'{}': {e}", item.product_name)),
                }
            }
            if subtotal != draft.subtotal {
                issues.push(format!(
                    "seller {} subtotal does not match its items",
                    draft.seller_id
                ));
            }
            let expected_total = (draft.subtotal as i128) + (draft.shipping as i128)
                - (draft.discount as i128);
            if expected_total < 0 || draft.total as i128 != expected_total {
                issues.push(format!(
                    "seller {} total does not equal subtotal + shipping - discount",
                    draft.seller_id
                ));
            }

            items_subtotal += draft.subtotal;
            shipping_total += draft.shipping;
            discount_total += draft.discount;
            total_amount += draft.total;
        }

        if total_amount as i128
            != items_subtotal as i128 + shipping_total as i128 - discount_total as i128
        {
            issues.push("order total does not equal items + shipping - discount".to_string());
        }

        if !issues.is_empty() {
            return Err(DomainError::validation_failed(issues));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            buyer_id: cmd.buyer_id,
            address: cmd.address.clone(),
            promo_code: cmd.promo_code.clone(),
            payment: cmd.payment,
            failure_reason: cmd.failure_reason.clone(),
            seller_orders: cmd.seller_orders.clone(),
            shipping_selections: cmd.shipping_selections.clone(),
            items_subtotal,
            shipping_total,
            discount_total,
            total_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_paid(&self, cmd: &MarkPaid) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        // No sub-order left in New: replay-safe no-op. Sub-orders that
        // already advanced (or terminally failed/cancelled) stay untouched.
        if self
            .seller_orders
            .iter()
            .all(|s| s.status != OrderStatus::New)
        {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::OrderPaid(OrderPaid {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_status(
        &self,
        cmd: &UpdateSellerStatus,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        let sub = self
            .seller_order(cmd.seller_order_id)
            .ok_or(DomainError::NotFound)?;

        if sub.status == cmd.target {
            return Ok(vec![]);
        }
        if !sub.status.can_transition(cmd.target) {
            return Err(DomainError::invalid_transition(format!(
                "cannot move sub-order {} from {} to {}",
                sub.id, sub.status, cmd.target
            )));
        }

        Ok(vec![OrderEvent::SellerOrderStatusChanged(
            SellerOrderStatusChanged {
                order_id: cmd.order_id,
                seller_order_id: cmd.seller_order_id,
                from: sub.status,
                to: cmd.target,
                tracking: cmd.tracking.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_compute_commission(
        &self,
        cmd: &ComputeCommission,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        let mut events = Vec::new();
        for sub in &self.seller_orders {
            if sub.commission_calculated_at.is_some() {
                // Already stamped; left untouched on replays.
                continue;
            }
            let rate = cmd
                .rates
                .iter()
                .find(|r| r.seller_order_id == sub.id)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "no commission rate provided for sub-order {}",
                        sub.id
                    ))
                })?;
            let amount = bps_share(sub.subtotal, rate.rate_bps);
            events.push(OrderEvent::CommissionCalculated(CommissionCalculated {
                order_id: cmd.order_id,
                seller_order_id: sub.id,
                rate_bps: rate.rate_bps,
                amount,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_apply_refund(&self, cmd: &ApplyRefund) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        if cmd.amount == 0 {
            return Err(DomainError::validation("refund amount must be positive"));
        }

        let sub = self
            .seller_order(cmd.seller_order_id)
            .ok_or(DomainError::NotFound)?;

        // This refund was already applied: replay-safe no-op.
        if let Some(refund_ref) = cmd.refund_ref {
            if sub.refund_refs.contains(&refund_ref) {
                return Ok(vec![]);
            }
        }

        if cmd.amount > sub.refundable() {
            return Err(DomainError::invariant(
                "refund exceeds the sub-order's remaining refundable balance",
            ));
        }

        let mut events = vec![OrderEvent::RefundApplied(RefundApplied {
            order_id: cmd.order_id,
            seller_order_id: cmd.seller_order_id,
            amount: cmd.amount,
            refund_ref: cmd.refund_ref,
            occurred_at: cmd.occurred_at,
        })];

        // A refund that exhausts the slice also retires its status, when the
        // table allows it from the current state.
        let fully_refunded = sub.refunded + cmd.amount == sub.total;
        if fully_refunded
            && sub.status != OrderStatus::Refunded
            && sub.status.can_transition(OrderStatus::Refunded)
        {
            events.push(OrderEvent::SellerOrderStatusChanged(
                SellerOrderStatusChanged {
                    order_id: cmd.order_id,
                    seller_order_id: cmd.seller_order_id,
                    from: sub.status,
                    to: OrderStatus::Refunded,
                    tracking: None,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
    }
}

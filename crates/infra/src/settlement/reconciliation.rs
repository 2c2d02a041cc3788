//! Payment reconciliation: provider callbacks → durable financial records.
//!
//! Callbacks arrive by provider reference, duplicated and out of order. The
//! guard on every branch is the selection's own state ("does it already
//! carry this status and an order id"), never a processed-callback table.
//! The Paid branch always re-affirms commission and escrow, both of which
//! decide nothing when their effect is already present — that is what makes
//! a replayed callback produce exactly one order, one sub-order set and one
//! escrow entry per sub-order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use plaza_core::{AggregateId, BuyerId};
use plaza_escrow::{EscrowAccount, EscrowCommand, HoldFunds, HoldSpec};
use plaza_events::{EventBus, EventEnvelope};
use plaza_orders::{
    price_checkout, ComputeCommission, MarkPaid, Order, OrderCommand, OrderId, PaymentDisposition,
    PlaceOrder, SellerCommissionRate, SellerOrderDraft, SellerOrderId, ShippingSelection,
};
use plaza_payments::{
    map_provider_status, PaymentSelection, PaymentStatus, RecordFailed, RecordPaid, RecordPending,
    RecordRefunded, SelectionCommand, SelectionId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::settlement::collaborators::{
    CheckoutDraftSource, DisplayNameResolver, Notification, NotificationSender, PromoCodeSource,
    ShippingRuleSource,
};
use crate::settlement::config::SettlementConfig;
use crate::settlement::registry::SelectionRegistry;
use crate::settlement::{with_conflict_retry, AGG_ESCROW, AGG_ORDER, AGG_SELECTION};

/// Namespace for deriving an order id from a provider reference.
///
/// The order an interrupted Paid flow started to build is found again on
/// replay through this derivation instead of being created twice.
pub const ORDER_NAMESPACE: Uuid = Uuid::from_u128(0x2b6c_9e05_7d18_4f3a_a4b1_c2d3e4f50617);

/// One inbound provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCallback {
    pub provider_reference: String,
    pub status: String,
    pub failure_reason: Option<String>,
}

/// What the caller learns from a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success {
        order_id: OrderId,
        already_processed: bool,
    },
    Pending {
        order_id: Option<OrderId>,
        already_processed: bool,
    },
    FailureRecorded {
        order_id: Option<OrderId>,
        already_processed: bool,
        reason: Option<String>,
    },
    Refunded {
        order_id: Option<OrderId>,
        already_refunded: bool,
    },
    /// Placement preconditions failed; the issues are for the buyer.
    Failed { issues: Vec<String> },
    /// Unknown provider reference. Non-fatal: callers show a generic
    /// "session expired" page.
    NotFound,
}

enum Placement {
    Placed,
    AlreadyPlaced,
    NoDraft,
    Invalid(Vec<String>),
}

/// The reconciliation service.
pub struct ReconciliationService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    registry: Arc<SelectionRegistry>,
    drafts: Arc<dyn CheckoutDraftSource>,
    shipping_rules: Arc<dyn ShippingRuleSource>,
    promo_codes: Arc<dyn PromoCodeSource>,
    directory: Arc<dyn DisplayNameResolver>,
    notifications: Arc<dyn NotificationSender>,
    config: SettlementConfig,
}

impl<S, B> ReconciliationService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        registry: Arc<SelectionRegistry>,
        drafts: Arc<dyn CheckoutDraftSource>,
        shipping_rules: Arc<dyn ShippingRuleSource>,
        promo_codes: Arc<dyn PromoCodeSource>,
        directory: Arc<dyn DisplayNameResolver>,
        notifications: Arc<dyn NotificationSender>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            drafts,
            shipping_rules,
            promo_codes,
            directory,
            notifications,
            config,
        }
    }

    pub fn order_id_for_reference(provider_reference: &str) -> OrderId {
        OrderId::new(AggregateId::derived(
            &ORDER_NAMESPACE,
            provider_reference.as_bytes(),
        ))
    }

    /// Consume one provider callback.
    ///
    /// Conflicting concurrent callbacks for the same reference retry here;
    /// the retry observes the first writer's effects and lands in a no-op
    /// branch.
    pub fn handle_callback(
        &self,
        callback: &ProviderCallback,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, DispatchError> {
        with_conflict_retry(|| self.handle_once(callback, now))
    }

    fn handle_once(
        &self,
        callback: &ProviderCallback,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, DispatchError> {
        let Some(selection_id) = self.registry.lookup(&callback.provider_reference) else {
            tracing::info!(
                reference = %callback.provider_reference,
                "callback for unknown provider reference"
            );
            return Ok(CallbackOutcome::NotFound);
        };

        let selection = self.load_selection(selection_id)?;
        if !selection.exists() {
            return Ok(CallbackOutcome::NotFound);
        }

        match map_provider_status(&callback.status) {
            PaymentStatus::Paid => self.on_paid(&selection, selection_id, callback, now),
            PaymentStatus::Pending => self.on_pending(&selection, selection_id, callback, now),
            PaymentStatus::Failed => self.on_failed(&selection, selection_id, callback, now),
            PaymentStatus::Refunded => self.on_refunded(&selection, selection_id, now),
        }
    }

    fn on_paid(
        &self,
        selection: &PaymentSelection,
        selection_id: SelectionId,
        callback: &ProviderCallback,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, DispatchError> {
        // Duplicate callback: re-affirm the financial side effects (both are
        // no-ops by state inspection) and report it as already processed.
        if selection.already_settled_as(PaymentStatus::Paid) {
            let order_id = selection.order_id().ok_or(DispatchError::NotFound)?;
            self.ensure_commission_calculated(order_id, now)?;
            self.ensure_escrow(order_id, now)?;
            return Ok(CallbackOutcome::Success {
                order_id,
                already_processed: true,
            });
        }

        let buyer_id = selection.buyer_id().ok_or(DispatchError::NotFound)?;
        let order_id = selection
            .order_id()
            .unwrap_or_else(|| Self::order_id_for_reference(&callback.provider_reference));

        match self.ensure_placed(order_id, buyer_id, PaymentDisposition::Paid, None, now)? {
            Placement::Placed => self.drafts.clear(buyer_id),
            Placement::AlreadyPlaced => {}
            Placement::NoDraft => {
                tracing::warn!(%order_id, "paid callback but no checkout draft to place");
                return Ok(CallbackOutcome::Failed {
                    issues: vec!["checkout session not found".to_string()],
                });
            }
            Placement::Invalid(issues) => return Ok(CallbackOutcome::Failed { issues }),
        }

        // A pending-placed order catches up to the payment.
        self.dispatcher.dispatch::<Order>(
            order_id.0,
            AGG_ORDER,
            OrderCommand::MarkPaid(MarkPaid {
                order_id,
                occurred_at: now,
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        self.dispatcher.dispatch::<PaymentSelection>(
            selection_id.0,
            AGG_SELECTION,
            SelectionCommand::RecordPaid(RecordPaid {
                selection_id,
                order_id: Some(order_id),
                occurred_at: now,
            }),
            |id| PaymentSelection::empty(SelectionId::new(id)),
        )?;
        self.registry.settle_pending(buyer_id, selection_id);

        self.ensure_commission_calculated(order_id, now)?;
        self.ensure_escrow(order_id, now)?;

        self.send_confirmation(buyer_id, order_id);

        tracing::info!(%order_id, reference = %callback.provider_reference, "payment reconciled as paid");
        Ok(CallbackOutcome::Success {
            order_id,
            already_processed: false,
        })
    }

    fn on_pending(
        &self,
        selection: &PaymentSelection,
        selection_id: SelectionId,
        callback: &ProviderCallback,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, DispatchError> {
        if selection.already_settled_as(PaymentStatus::Pending) {
            return Ok(CallbackOutcome::Pending {
                order_id: selection.order_id(),
                already_processed: true,
            });
        }
        // A stale pending after a final status changes nothing.
        if selection.status() != PaymentStatus::Pending {
            return Ok(CallbackOutcome::Pending {
                order_id: selection.order_id(),
                already_processed: true,
            });
        }

        let buyer_id = selection.buyer_id().ok_or(DispatchError::NotFound)?;
        let order_id = selection
            .order_id()
            .unwrap_or_else(|| Self::order_id_for_reference(&callback.provider_reference));

        match self.ensure_placed(order_id, buyer_id, PaymentDisposition::Pending, None, now)? {
            Placement::Placed => self.drafts.clear(buyer_id),
            Placement::AlreadyPlaced => {}
            Placement::NoDraft => {
                return Ok(CallbackOutcome::Failed {
                    issues: vec!["checkout session not found".to_string()],
                });
            }
            Placement::Invalid(issues) => return Ok(CallbackOutcome::Failed { issues }),
        }

        self.dispatcher.dispatch::<PaymentSelection>(
            selection_id.0,
            AGG_SELECTION,
            SelectionCommand::RecordPending(RecordPending {
                selection_id,
                order_id: Some(order_id),
                occurred_at: now,
            }),
            |id| PaymentSelection::empty(SelectionId::new(id)),
        )?;

        tracing::info!(%order_id, reference = %callback.provider_reference, "payment pending");
        Ok(CallbackOutcome::Pending {
            order_id: Some(order_id),
            already_processed: false,
        })
    }

    fn on_failed(
        &self,
        selection: &PaymentSelection,
        selection_id: SelectionId,
        callback: &ProviderCallback,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, DispatchError> {
        if selection.already_settled_as(PaymentStatus::Failed) {
            return Ok(CallbackOutcome::FailureRecorded {
                order_id: selection.order_id(),
                already_processed: true,
                reason: selection.failure_reason().map(str::to_string),
            });
        }
        // Money that already arrived (or was returned) is not failed by a
        // stale callback.
        if matches!(
            selection.status(),
            PaymentStatus::Paid | PaymentStatus::Refunded
        ) {
            tracing::warn!(
                reference = %callback.provider_reference,
                "failure callback after a final status; ignored"
            );
            return Ok(CallbackOutcome::FailureRecorded {
                order_id: selection.order_id(),
                already_processed: true,
                reason: callback.failure_reason.clone(),
            });
        }

        let buyer_id = selection.buyer_id().ok_or(DispatchError::NotFound)?;

        // Failed attempts still leave an auditable order when a cart exists.
        // The cart is NOT cleared — the buyer retries with it.
        let order_id = match selection.order_id() {
            Some(existing) => Some(existing),
            None => {
                let derived = Self::order_id_for_reference(&callback.provider_reference);
                match self.ensure_placed(
                    derived,
                    buyer_id,
                    PaymentDisposition::Failed,
                    callback.failure_reason.clone(),
                    now,
                )? {
                    Placement::Placed | Placement::AlreadyPlaced => Some(derived),
                    Placement::NoDraft | Placement::Invalid(_) => None,
                }
            }
        };

        self.dispatcher.dispatch::<PaymentSelection>(
            selection_id.0,
            AGG_SELECTION,
            SelectionCommand::RecordFailed(RecordFailed {
                selection_id,
                reason: callback.failure_reason.clone(),
                order_id,
                occurred_at: now,
            }),
            |id| PaymentSelection::empty(SelectionId::new(id)),
        )?;
        self.registry.settle_pending(buyer_id, selection_id);

        tracing::info!(
            reference = %callback.provider_reference,
            reason = ?callback.failure_reason,
            "payment failure recorded"
        );
        Ok(CallbackOutcome::FailureRecorded {
            order_id,
            already_processed: false,
            reason: callback.failure_reason.clone(),
        })
    }

    fn on_refunded(
        &self,
        selection: &PaymentSelection,
        selection_id: SelectionId,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, DispatchError> {
        let already_refunded = selection.status() == PaymentStatus::Refunded;

        // Marks the selection only. Moving money back is the dispute
        // workflow's job; this path exists for provider-initiated refund
        // notifications outside it.
        self.dispatcher.dispatch::<PaymentSelection>(
            selection_id.0,
            AGG_SELECTION,
            SelectionCommand::RecordRefunded(RecordRefunded {
                selection_id,
                occurred_at: now,
            }),
            |id| PaymentSelection::empty(SelectionId::new(id)),
        )?;

        Ok(CallbackOutcome::Refunded {
            order_id: selection.order_id(),
            already_refunded,
        })
    }

    /// Place the order for a checkout draft if its stream is still empty.
    fn ensure_placed(
        &self,
        order_id: OrderId,
        buyer_id: BuyerId,
        payment: PaymentDisposition,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Placement, DispatchError> {
        let order = self.load_order(order_id)?;
        if order.is_placed() {
            return Ok(Placement::AlreadyPlaced);
        }

        let Some(draft) = self.drafts.load_draft(buyer_id) else {
            return Ok(Placement::NoDraft);
        };

        let promo = draft
            .promo_code
            .as_deref()
            .and_then(|code| self.promo_codes.lookup(code));
        let quote = match price_checkout(
            &draft.lines,
            &draft.shipping_choices,
            &self.shipping_rules.rules(),
            promo.as_ref(),
        ) {
            Ok(quote) => quote,
            Err(plaza_core::DomainError::ValidationFailed(issues)) => {
                return Ok(Placement::Invalid(issues));
            }
            Err(other) => return Err(other.into()),
        };

        let seller_orders: Vec<SellerOrderDraft> = quote
            .sellers
            .iter()
            .map(|s| SellerOrderDraft {
                seller_order_id: SellerOrderId::new(AggregateId::new()),
                seller_id: s.seller_id,
                seller_name: s.seller_name.clone(),
                items: s
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(idx, line)| plaza_orders::OrderItem {
                        line_no: (idx as u32) + 1,
                        product_name: line.product_name.clone(),
                        unit_price: line.unit_price,
                        quantity: line.quantity,
                    })
                    .collect(),
                subtotal: s.subtotal,
                shipping: s.shipping,
                discount: s.discount,
                total: s.total,
            })
            .collect();
        let shipping_selections: Vec<ShippingSelection> = quote
            .sellers
            .iter()
            .map(|s| ShippingSelection {
                seller_id: s.seller_id,
                method: s.shipping_method.clone(),
                cost: s.shipping,
            })
            .collect();

        let result = self.dispatcher.dispatch::<Order>(
            order_id.0,
            AGG_ORDER,
            OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                buyer_id,
                address: draft.address.clone(),
                promo_code: draft.promo_code.clone(),
                payment,
                failure_reason,
                seller_orders,
                shipping_selections,
                occurred_at: now,
            }),
            |id| Order::empty(OrderId::new(id)),
        );

        match result {
            Ok(_) => Ok(Placement::Placed),
            Err(DispatchError::ValidationFailed(issues)) => Ok(Placement::Invalid(issues)),
            Err(other) => Err(other),
        }
    }

    /// Compute commission for every sub-order not yet stamped. Safe on every
    /// Paid-branch pass, including duplicates.
    pub fn ensure_commission_calculated(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let order = self.load_order(order_id)?;
        if !order.is_placed() {
            return Err(DispatchError::NotFound);
        }
        if order
            .seller_orders()
            .iter()
            .all(|s| s.commission_calculated_at().is_some())
        {
            return Ok(());
        }

        let rates: Vec<SellerCommissionRate> = order
            .seller_orders()
            .iter()
            .map(|s| SellerCommissionRate {
                seller_order_id: s.id_typed(),
                rate_bps: self.config.commission.rate_bps(s.seller_id()),
            })
            .collect();

        self.dispatcher.dispatch::<Order>(
            order_id.0,
            AGG_ORDER,
            OrderCommand::ComputeCommission(ComputeCommission {
                order_id,
                rates,
                occurred_at: now,
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;
        Ok(())
    }

    /// Create the order's escrow entries if none exist yet. One entry per
    /// sub-order, `held = sub-order total`, payout share = held − commission.
    pub fn ensure_escrow(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<(), DispatchError> {
        let order = self.load_order(order_id)?;
        if !order.is_placed() {
            return Err(DispatchError::NotFound);
        }
        let buyer_id = order.buyer_id().ok_or(DispatchError::NotFound)?;

        let account_id = EscrowAccount::account_id_for(order_id);
        let account = self
            .dispatcher
            .load::<EscrowAccount>(account_id, EscrowAccount::empty)?;
        if account.exists() {
            return Ok(());
        }

        let entries: Vec<HoldSpec> = order
            .seller_orders()
            .iter()
            .map(|s| HoldSpec {
                seller_order_id: s.id_typed(),
                seller_id: s.seller_id(),
                held_amount: s.total(),
                commission_amount: s.commission_amount(),
            })
            .collect();

        self.dispatcher.dispatch::<EscrowAccount>(
            account_id,
            AGG_ESCROW,
            EscrowCommand::HoldFunds(HoldFunds {
                order_id,
                buyer_id,
                entries,
                occurred_at: now,
            }),
            EscrowAccount::empty,
        )?;

        tracing::info!(%order_id, "escrow entries created");
        Ok(())
    }

    fn send_confirmation(&self, buyer_id: BuyerId, order_id: OrderId) {
        let name = self
            .directory
            .buyer_name(buyer_id)
            .unwrap_or_else(|| "customer".to_string());
        self.notifications.send(Notification {
            recipient: buyer_id.to_string(),
            subject: format!("Order {order_id} confirmed"),
            body: format!("Hi {name}, your payment was received and your order is confirmed."),
        });
    }

    fn load_selection(&self, selection_id: SelectionId) -> Result<PaymentSelection, DispatchError> {
        self.dispatcher
            .load::<PaymentSelection>(selection_id.0, |id| {
                PaymentSelection::empty(SelectionId::new(id))
            })
    }

    fn load_order(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        self.dispatcher
            .load::<Order>(order_id.0, |id| Order::empty(OrderId::new(id)))
    }
}

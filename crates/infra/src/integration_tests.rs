//! Integration tests for the full settlement pipeline.
//!
//! Wires the real store, bus, projections and services together and drives
//! the flows end to end: checkout → provider callback → commission/escrow →
//! delivery → payout batching → invoicing, plus the return workflow feeding
//! refunds back into the ledger.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::Value as JsonValue;

    use plaza_core::{AggregateId, BuyerId, SellerId};
    use plaza_disputes::{RequestKind, RequestStatus, Resolution, SellerDecision};
    use plaza_escrow::EscrowStatus;
    use plaza_events::{EventEnvelope, InMemoryEventBus};
    use plaza_orders::{
        AddressSnapshot, CartLine, OrderStatus, PromoCode, ShippingChoice, ShippingRule,
    };
    use plaza_payments::PaymentMethod;
    use plaza_payouts::ScheduleStatus;

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::InMemoryEventStore;
    use crate::projections::{
        DisputesProjection, EnvelopeConsumer, EscrowEntriesProjection, InvoicesProjection,
        OrdersProjection, PayoutSchedulesProjection, SharedDisputesProjection,
        SharedEscrowEntriesProjection, SharedInvoicesProjection, SharedOrdersProjection,
        SharedPayoutSchedulesProjection,
    };
    use crate::read_model::InMemoryReadStore;
    use crate::settlement::collaborators::CheckoutDraftSource;
    use crate::settlement::{
        CallbackOutcome, CheckoutDraft, CheckoutService, DisputeService, FulfilmentService,
        InMemoryCheckoutDrafts, InMemoryPromoCodes, InvoicingRunService, PayoutRunService,
        ProviderCallback, ReconciliationService, RecordingNotifications, SelectionRegistry,
        SettlementConfig, SnapshotService, StaticDirectory, StaticShippingRules,
    };
    use crate::workers::ProjectionWorker;

    type Store = Arc<InMemoryEventStore>;
    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn seller_a() -> SellerId {
        SellerId::from_uuid(uuid::Uuid::from_u128(0xA1))
    }

    fn seller_b() -> SellerId {
        SellerId::from_uuid(uuid::Uuid::from_u128(0xB2))
    }

    struct Harness {
        dispatcher: Arc<CommandDispatcher<Store, Bus>>,
        event_store: Store,
        drafts: Arc<InMemoryCheckoutDrafts>,
        promos: Arc<InMemoryPromoCodes>,
        notifications: Arc<RecordingNotifications>,
        orders: SharedOrdersProjection,
        escrow: SharedEscrowEntriesProjection,
        payouts: SharedPayoutSchedulesProjection,
        invoices: SharedInvoicesProjection,
        disputes_rm: SharedDisputesProjection,
        checkout: CheckoutService<Store, Bus>,
        reconciliation: ReconciliationService<Store, Bus>,
        fulfilment: FulfilmentService<Store, Bus>,
        payout_run: PayoutRunService<Store, Bus>,
        invoicing_run: InvoicingRunService<Store, Bus>,
        disputes: DisputeService<Store, Bus>,
        snapshots: SnapshotService,
        _worker: ProjectionWorker,
    }

    fn harness() -> Harness {
        // Hold period of zero: delivery makes entries eligible immediately,
        // which keeps the payout tests free of clock juggling.
        let config = SettlementConfig::default().with_hold_days(0);

        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));

        let orders: SharedOrdersProjection =
            Arc::new(OrdersProjection::new(Arc::new(InMemoryReadStore::new())));
        let escrow: SharedEscrowEntriesProjection = Arc::new(EscrowEntriesProjection::new(
            Arc::new(InMemoryReadStore::new()),
        ));
        let payouts: SharedPayoutSchedulesProjection = Arc::new(PayoutSchedulesProjection::new(
            Arc::new(InMemoryReadStore::new()),
        ));
        let invoices: SharedInvoicesProjection =
            Arc::new(InvoicesProjection::new(Arc::new(InMemoryReadStore::new())));
        let disputes_rm: SharedDisputesProjection =
            Arc::new(DisputesProjection::new(Arc::new(InMemoryReadStore::new())));

        let worker = ProjectionWorker::spawn(
            &bus,
            vec![
                orders.clone() as Arc<dyn EnvelopeConsumer>,
                escrow.clone() as Arc<dyn EnvelopeConsumer>,
                payouts.clone() as Arc<dyn EnvelopeConsumer>,
                invoices.clone() as Arc<dyn EnvelopeConsumer>,
                disputes_rm.clone() as Arc<dyn EnvelopeConsumer>,
            ],
        );

        let registry = Arc::new(SelectionRegistry::new());
        let drafts = Arc::new(InMemoryCheckoutDrafts::new());
        let rules = Arc::new(StaticShippingRules::new(vec![
            ShippingRule {
                seller_id: seller_a(),
                method: "standard".to_string(),
                cost: 0,
            },
            ShippingRule {
                seller_id: seller_b(),
                method: "standard".to_string(),
                cost: 0,
            },
        ]));
        let promos = Arc::new(InMemoryPromoCodes::new());
        let directory = Arc::new(StaticDirectory::new());
        let notifications = Arc::new(RecordingNotifications::new());

        let checkout = CheckoutService::new(dispatcher.clone(), registry.clone());
        let reconciliation = ReconciliationService::new(
            dispatcher.clone(),
            registry,
            drafts.clone(),
            rules,
            promos.clone(),
            directory.clone(),
            notifications.clone(),
            config.clone(),
        );
        let fulfilment = FulfilmentService::new(dispatcher.clone(), config.clone());
        let payout_run =
            PayoutRunService::new(dispatcher.clone(), escrow.clone(), config.clone());
        let invoicing_run =
            InvoicingRunService::new(dispatcher.clone(), escrow.clone(), config.clone());
        let disputes = DisputeService::new(dispatcher.clone(), disputes_rm.clone());
        let snapshots = SnapshotService::new(
            orders.clone(),
            escrow.clone(),
            payouts.clone(),
            invoices.clone(),
            disputes_rm.clone(),
            directory,
        );

        Harness {
            dispatcher,
            event_store: store,
            drafts,
            promos,
            notifications,
            orders,
            escrow,
            payouts,
            invoices,
            disputes_rm,
            checkout,
            reconciliation,
            fulfilment,
            payout_run,
            invoicing_run,
            disputes,
            snapshots,
            _worker: worker,
        }
    }

    /// The projection worker applies events on its own thread.
    fn wait_for_projections() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    fn test_address() -> AddressSnapshot {
        AddressSnapshot {
            recipient: "R. Byers".to_string(),
            line1: "12 Canal St".to_string(),
            line2: None,
            city: "Rotterdam".to_string(),
            postal_code: "3011".to_string(),
            country: "NL".to_string(),
        }
    }

    /// Seed the canonical two-seller cart: $80 with seller A, $40 with
    /// seller B, free shipping, no promo.
    fn seed_two_seller_draft(harness: &Harness, buyer: BuyerId) {
        harness.drafts.save(CheckoutDraft {
            buyer_id: buyer,
            address: test_address(),
            lines: vec![
                CartLine {
                    seller_id: seller_a(),
                    seller_name: "Atelier North".to_string(),
                    product_name: "walnut lamp".to_string(),
                    unit_price: 8_000,
                    quantity: 1,
                },
                CartLine {
                    seller_id: seller_b(),
                    seller_name: "Bowline Goods".to_string(),
                    product_name: "canvas tote".to_string(),
                    unit_price: 4_000,
                    quantity: 1,
                },
            ],
            shipping_choices: vec![
                ShippingChoice {
                    seller_id: seller_a(),
                    method: "standard".to_string(),
                },
                ShippingChoice {
                    seller_id: seller_b(),
                    method: "standard".to_string(),
                },
            ],
            promo_code: None,
        });
    }

    fn paid_callback(reference: &str) -> ProviderCallback {
        ProviderCallback {
            provider_reference: reference.to_string(),
            status: "success".to_string(),
            failure_reason: None,
        }
    }

    /// Checkout + paid callback; returns the settled order id.
    fn settle_paid_order(harness: &Harness, buyer: BuyerId, reference: &str) -> plaza_orders::OrderId {
        seed_two_seller_draft(harness, buyer);
        harness
            .checkout
            .create_selection(buyer, PaymentMethod::Card, reference, Utc::now())
            .unwrap();

        match harness
            .reconciliation
            .handle_callback(&paid_callback(reference), Utc::now())
            .unwrap()
        {
            CallbackOutcome::Success {
                order_id,
                already_processed,
            } => {
                assert!(!already_processed);
                order_id
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    /// Walk one sub-order from Paid to Delivered as its seller.
    fn deliver(harness: &Harness, order_id: plaza_orders::OrderId, seller: SellerId) {
        let order = harness
            .dispatcher
            .load::<plaza_orders::Order>(order_id.0, |id| {
                plaza_orders::Order::empty(plaza_orders::OrderId::new(id))
            })
            .unwrap();
        let sub = order
            .seller_orders()
            .iter()
            .find(|s| s.seller_id() == seller)
            .expect("seller has a sub-order")
            .id_typed();

        for target in [OrderStatus::Preparing, OrderStatus::Shipped, OrderStatus::Delivered] {
            harness
                .fulfilment
                .seller_update_status(seller, order_id, sub, target, None, Utc::now())
                .unwrap();
        }
    }

    #[test]
    fn paid_callback_settles_the_cart_end_to_end() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        wait_for_projections();

        let order = harness.orders.get(&order_id).expect("order read model");
        assert_eq!(order.total_amount, 12_000);
        assert_eq!(order.overall_status, OrderStatus::Paid);
        assert_eq!(order.sellers.len(), 2);
        // 10% default commission on each seller's subtotal.
        assert_eq!(order.commission_total, 800 + 400);

        let entries = harness.escrow.list_for_order(order_id);
        assert_eq!(entries.len(), 2);
        let entry_a = entries.iter().find(|e| e.seller_id == seller_a()).unwrap();
        assert_eq!(entry_a.held_amount, 8_000);
        assert_eq!(entry_a.commission_amount, 800);
        assert_eq!(entry_a.seller_payout_amount, 7_200);
        let entry_b = entries.iter().find(|e| e.seller_id == seller_b()).unwrap();
        assert_eq!(entry_b.held_amount, 4_000);
        assert_eq!(entry_b.commission_amount, 400);
        assert_eq!(entry_b.seller_payout_amount, 3_600);
        for entry in &entries {
            assert_eq!(
                entry.held_amount,
                entry.commission_amount + entry.seller_payout_amount
            );
        }

        // Cart cleared only on success; confirmation went out.
        assert!(harness.drafts.load_draft(buyer).is_none());
        assert_eq!(harness.notifications.sent().len(), 1);
    }

    #[test]
    fn replaying_the_paid_callback_changes_nothing() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");

        let replay = harness
            .reconciliation
            .handle_callback(&paid_callback("ref-1"), Utc::now())
            .unwrap();
        match replay {
            CallbackOutcome::Success {
                order_id: replay_order,
                already_processed,
            } => {
                assert_eq!(replay_order, order_id);
                assert!(already_processed);
            }
            other => panic!("expected Success, got {other:?}"),
        }
        wait_for_projections();

        // Exactly one order, two sub-orders, two escrow rows, commission once.
        assert_eq!(harness.orders.list().len(), 1);
        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.sellers.len(), 2);
        assert_eq!(order.commission_total, 1_200);
        assert_eq!(harness.escrow.list_for_order(order_id).len(), 2);
    }

    #[test]
    fn pending_callback_places_a_new_order_then_paid_catches_up() {
        let harness = harness();
        let buyer = BuyerId::new();
        seed_two_seller_draft(&harness, buyer);
        harness
            .checkout
            .create_selection(buyer, PaymentMethod::BankTransfer, "ref-p", Utc::now())
            .unwrap();

        let pending = ProviderCallback {
            provider_reference: "ref-p".to_string(),
            status: "awaiting_payment".to_string(),
            failure_reason: None,
        };
        let order_id = match harness
            .reconciliation
            .handle_callback(&pending, Utc::now())
            .unwrap()
        {
            CallbackOutcome::Pending {
                order_id: Some(order_id),
                already_processed,
            } => {
                assert!(!already_processed);
                order_id
            }
            other => panic!("expected Pending, got {other:?}"),
        };
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.overall_status, OrderStatus::New);
        // Pending never creates escrow.
        assert!(harness.escrow.list_for_order(order_id).is_empty());

        // The success callback catches the same order up.
        match harness
            .reconciliation
            .handle_callback(&paid_callback("ref-p"), Utc::now())
            .unwrap()
        {
            CallbackOutcome::Success {
                order_id: paid_order,
                already_processed,
            } => {
                assert_eq!(paid_order, order_id);
                assert!(!already_processed);
            }
            other => panic!("expected Success, got {other:?}"),
        }
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.overall_status, OrderStatus::Paid);
        assert_eq!(harness.escrow.list_for_order(order_id).len(), 2);
    }

    #[test]
    fn failed_callback_leaves_an_auditable_order_and_keeps_the_cart() {
        let harness = harness();
        let buyer = BuyerId::new();
        seed_two_seller_draft(&harness, buyer);
        harness
            .checkout
            .create_selection(buyer, PaymentMethod::Card, "ref-f", Utc::now())
            .unwrap();

        let failed = ProviderCallback {
            provider_reference: "ref-f".to_string(),
            status: "cancelled".to_string(),
            failure_reason: Some("card declined".to_string()),
        };
        let order_id = match harness
            .reconciliation
            .handle_callback(&failed, Utc::now())
            .unwrap()
        {
            CallbackOutcome::FailureRecorded {
                order_id: Some(order_id),
                already_processed,
                reason,
            } => {
                assert!(!already_processed);
                assert_eq!(reason.as_deref(), Some("card declined"));
                order_id
            }
            other => panic!("expected FailureRecorded, got {other:?}"),
        };
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.overall_status, OrderStatus::Failed);
        assert_eq!(order.failure_reason.as_deref(), Some("card declined"));
        // The buyer retries with the same cart.
        assert!(harness.drafts.load_draft(buyer).is_some());
        assert!(harness.escrow.list_for_order(order_id).is_empty());

        // Replay reports already-processed.
        match harness
            .reconciliation
            .handle_callback(&failed, Utc::now())
            .unwrap()
        {
            CallbackOutcome::FailureRecorded {
                already_processed, ..
            } => assert!(already_processed),
            other => panic!("expected FailureRecorded, got {other:?}"),
        }
    }

    #[test]
    fn unknown_reference_is_not_found() {
        let harness = harness();
        let outcome = harness
            .reconciliation
            .handle_callback(&paid_callback("ghost"), Utc::now())
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::NotFound);
    }

    #[test]
    fn delivery_makes_entries_eligible_and_the_payout_run_batches_them() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");

        deliver(&harness, order_id, seller_a());
        deliver(&harness, order_id, seller_b());
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.overall_status, OrderStatus::Delivered);

        // Zero hold: both entries are eligible now.
        let run_at = Utc::now() + Duration::seconds(1);
        let report = harness.payout_run.run(run_at).unwrap();
        assert_eq!(report.batched.len(), 2);
        wait_for_projections();

        let schedules_a = harness.payouts.list_for_seller(seller_a());
        assert_eq!(schedules_a.len(), 1);
        assert_eq!(schedules_a[0].total_amount, 7_200);
        let schedules_b = harness.payouts.list_for_seller(seller_b());
        assert_eq!(schedules_b[0].total_amount, 3_600);

        // A second run finds nothing left to batch.
        let rerun = harness.payout_run.run(run_at).unwrap();
        assert!(rerun.batched.is_empty());

        // Paying the batch releases its entries to the seller.
        let schedule_id = schedules_a[0].schedule_id;
        harness.payout_run.start_processing(schedule_id, run_at).unwrap();
        harness.payout_run.mark_paid(schedule_id, run_at).unwrap();
        wait_for_projections();

        let entries = harness.escrow.list_for_seller(seller_a());
        assert_eq!(entries[0].status, EscrowStatus::ReleasedToSeller);
        let schedule = harness.payouts.get(&schedule_id).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Paid);
    }

    #[test]
    fn failed_payout_increments_attempts_and_retries() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_a());
        deliver(&harness, order_id, seller_b());
        wait_for_projections();

        let run_at = Utc::now() + Duration::seconds(1);
        harness.payout_run.run(run_at).unwrap();
        wait_for_projections();

        let schedule_id = harness.payouts.list_for_seller(seller_a())[0].schedule_id;
        harness.payout_run.start_processing(schedule_id, run_at).unwrap();
        harness
            .payout_run
            .mark_failed(schedule_id, "bank rejected transfer", run_at)
            .unwrap();
        wait_for_projections();

        let schedule = harness.payouts.get(&schedule_id).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Failed);
        assert_eq!(schedule.attempt_count, 1);

        // Retry succeeds.
        harness.payout_run.start_processing(schedule_id, run_at).unwrap();
        harness.payout_run.mark_paid(schedule_id, run_at).unwrap();
        wait_for_projections();

        let schedule = harness.payouts.get(&schedule_id).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Paid);
        assert_eq!(schedule.attempt_count, 2);
    }

    #[test]
    fn full_refund_resolution_returns_held_funds_to_the_buyer() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_b());
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        let sub_b = order
            .sellers
            .iter()
            .find(|s| s.seller_id == seller_b())
            .unwrap()
            .seller_order_id;

        let request_id = harness
            .disputes
            .open_request(
                buyer,
                order_id,
                sub_b,
                RequestKind::Return,
                "damaged on arrival".to_string(),
                None,
                Utc::now(),
            )
            .unwrap();
        harness
            .disputes
            .decide(seller_b(), request_id, SellerDecision::Accept, None, Utc::now())
            .unwrap();
        harness
            .disputes
            .resolve(
                seller_b(),
                request_id,
                Resolution::FullRefund,
                Some(4_000),
                Utc::now(),
            )
            .unwrap();
        wait_for_projections();

        let request = harness.disputes_rm.get(&request_id).unwrap();
        assert_eq!(request.status, RequestStatus::Completed);

        let entry = harness.escrow.get(&sub_b).unwrap();
        assert_eq!(entry.held_amount, 0);
        assert_eq!(entry.status, EscrowStatus::ReleasedToBuyer);

        let order = harness.orders.get(&order_id).unwrap();
        let sub = order.sellers.iter().find(|s| s.seller_order_id == sub_b).unwrap();
        assert_eq!(sub.refunded, 4_000);
        assert_eq!(sub.status, OrderStatus::Refunded);
        assert_eq!(order.refunded_amount, 4_000);
        // One refunded sub-order dominates the overall status.
        assert_eq!(order.overall_status, OrderStatus::Refunded);

        // Replaying the resolution applies nothing twice.
        harness
            .disputes
            .resolve(
                seller_b(),
                request_id,
                Resolution::FullRefund,
                Some(4_000),
                Utc::now(),
            )
            .unwrap();
        wait_for_projections();
        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.refunded_amount, 4_000);

        // External transfer confirmation completes the refund.
        harness.disputes.confirm_refund(request_id, Utc::now()).unwrap();
        wait_for_projections();
        let request = harness.disputes_rm.get(&request_id).unwrap();
        assert_eq!(
            request.refund_status,
            Some(plaza_disputes::RefundStatus::Completed)
        );
    }

    #[test]
    fn refund_above_the_refundable_balance_is_rejected() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_b());
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        let sub_b = order
            .sellers
            .iter()
            .find(|s| s.seller_id == seller_b())
            .unwrap()
            .seller_order_id;

        let request_id = harness
            .disputes
            .open_request(
                buyer,
                order_id,
                sub_b,
                RequestKind::Complaint,
                "tote seam split".to_string(),
                None,
                Utc::now(),
            )
            .unwrap();
        harness
            .disputes
            .decide(
                seller_b(),
                request_id,
                SellerDecision::ProposePartial,
                None,
                Utc::now(),
            )
            .unwrap();

        let err = harness
            .disputes
            .resolve(
                seller_b(),
                request_id,
                Resolution::PartialRefund,
                Some(4_001),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));

        wait_for_projections();
        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.refunded_amount, 0);
    }

    #[test]
    fn foreign_seller_cannot_act_on_anothers_dispute() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_b());
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        let sub_b = order
            .sellers
            .iter()
            .find(|s| s.seller_id == seller_b())
            .unwrap()
            .seller_order_id;

        let request_id = harness
            .disputes
            .open_request(
                buyer,
                order_id,
                sub_b,
                RequestKind::Return,
                "damaged".to_string(),
                None,
                Utc::now(),
            )
            .unwrap();

        let err = harness
            .disputes
            .decide(seller_a(), request_id, SellerDecision::Accept, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden));
    }

    #[test]
    fn sellers_cannot_move_each_others_sub_orders() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        let sub_a = order
            .sellers
            .iter()
            .find(|s| s.seller_id == seller_a())
            .unwrap()
            .seller_order_id;

        let err = harness
            .fulfilment
            .seller_update_status(
                seller_b(),
                order_id,
                sub_a,
                OrderStatus::Preparing,
                None,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden));
    }

    #[test]
    fn invoicing_run_rolls_commission_and_credits_refunds() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_b());
        wait_for_projections();

        let touched = harness.invoicing_run.run(Utc::now()).unwrap();
        assert_eq!(touched, 2);
        wait_for_projections();

        let invoices_a = harness.invoices.list_for_seller(seller_a());
        assert_eq!(invoices_a.len(), 1);
        assert_eq!(invoices_a[0].total_commission, 800);
        let invoices_b = harness.invoices.list_for_seller(seller_b());
        assert_eq!(invoices_b[0].total_commission, 400);

        // A re-run adds nothing.
        assert_eq!(harness.invoicing_run.run(Utc::now()).unwrap(), 0);

        // A big partial refund cuts into commission; the next run credits it.
        let order = harness.orders.get(&order_id).unwrap();
        let sub_b = order
            .sellers
            .iter()
            .find(|s| s.seller_id == seller_b())
            .unwrap()
            .seller_order_id;
        let request_id = harness
            .disputes
            .open_request(
                buyer,
                order_id,
                sub_b,
                RequestKind::Return,
                "damaged".to_string(),
                None,
                Utc::now(),
            )
            .unwrap();
        harness
            .disputes
            .decide(seller_b(), request_id, SellerDecision::Accept, None, Utc::now())
            .unwrap();
        harness
            .disputes
            .resolve(
                seller_b(),
                request_id,
                Resolution::PartialRefund,
                Some(3_700),
                Utc::now(),
            )
            .unwrap();
        wait_for_projections();

        // 3_700 refund consumes the 3_600 payout share then 100 commission.
        assert_eq!(harness.invoicing_run.run(Utc::now()).unwrap(), 1);
        wait_for_projections();

        let invoices_b = harness.invoices.list_for_seller(seller_b());
        assert_eq!(invoices_b[0].total_commission, 300);
        assert!(invoices_b[0].lines.iter().any(|l| l.is_credit));
    }

    #[test]
    fn settlement_snapshot_assembles_the_full_picture() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_a());
        deliver(&harness, order_id, seller_b());
        wait_for_projections();

        harness.payout_run.run(Utc::now() + Duration::seconds(1)).unwrap();
        wait_for_projections();

        let snapshot = harness.snapshots.settlement_snapshot(order_id).unwrap();
        assert_eq!(snapshot.order.order_id, order_id);
        assert_eq!(snapshot.escrow_entries.len(), 2);
        assert_eq!(snapshot.payout_schedules.len(), 2);
        // No directory entry: the fallback label, never a failure.
        assert_eq!(snapshot.buyer_name, "customer");

        let statement = harness.snapshots.seller_statement(seller_a());
        assert_eq!(statement.escrow_entries.len(), 1);
        assert_eq!(statement.payout_schedules.len(), 1);
    }

    #[test]
    fn mixed_sub_order_statuses_aggregate_for_the_buyer() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_a());
        wait_for_projections();

        // One Delivered, one Paid: the buyer sees Shipped.
        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.overall_status, OrderStatus::Shipped);
    }

    #[test]
    fn projections_rebuild_from_the_event_store() {
        let harness = harness();
        let buyer = BuyerId::new();
        let order_id = settle_paid_order(&harness, buyer, "ref-1");
        deliver(&harness, order_id, seller_a());
        wait_for_projections();

        let before = harness.orders.get(&order_id).unwrap();

        // Read models are disposable: wipe them and replay the store.
        let consumers: Vec<Arc<dyn EnvelopeConsumer>> = vec![
            harness.orders.clone(),
            harness.escrow.clone(),
            harness.payouts.clone(),
            harness.invoices.clone(),
            harness.disputes_rm.clone(),
        ];
        crate::projections::rebuild_from_events(&consumers, harness.event_store.all_events());

        let after = harness.orders.get(&order_id).unwrap();
        assert_eq!(before, after);
        assert_eq!(harness.escrow.list_for_order(order_id).len(), 2);
    }

    #[test]
    fn promo_discount_flows_into_the_placed_order() {
        let harness = harness();
        let buyer = BuyerId::new();
        seed_two_seller_draft(&harness, buyer);

        // Re-save the draft with a promo attached.
        let mut draft = harness.drafts.load_draft(buyer).unwrap();
        draft.promo_code = Some("SAVE10".to_string());
        harness.drafts.save(draft);
        harness.promos.add(PromoCode {
            code: "SAVE10".to_string(),
            discount_bps: 1_000,
            min_subtotal: 0,
        });

        harness
            .checkout
            .create_selection(buyer, PaymentMethod::Card, "ref-promo", Utc::now())
            .unwrap();
        let order_id = match harness
            .reconciliation
            .handle_callback(&paid_callback("ref-promo"), Utc::now())
            .unwrap()
        {
            CallbackOutcome::Success { order_id, .. } => order_id,
            other => panic!("expected Success, got {other:?}"),
        };
        wait_for_projections();

        let order = harness.orders.get(&order_id).unwrap();
        assert_eq!(order.discount_total, 1_200);
        assert_eq!(order.total_amount, 10_800);
        let seller_sum: u64 = order.sellers.iter().map(|s| s.total).sum();
        assert_eq!(seller_sum, order.total_amount);
    }
}

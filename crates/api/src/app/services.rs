//! Infrastructure wiring for the API process.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use chrono::Utc;

use plaza_escrow::TableCommissionPolicy;
use plaza_events::{EventEnvelope, InMemoryEventBus};
use plaza_infra::command_dispatcher::CommandDispatcher;
use plaza_infra::event_store::InMemoryEventStore;
use plaza_infra::jobs::{InMemoryJobStore, Job, JobExecutor, JobKind, JobStore, RetryPolicy};
use plaza_infra::projections::{
    DisputesProjection, EnvelopeConsumer, EscrowEntriesProjection, InvoicesProjection,
    OrdersProjection, PayoutSchedulesProjection, SharedDisputesProjection,
    SharedEscrowEntriesProjection, SharedInvoicesProjection, SharedOrdersProjection,
    SharedPayoutSchedulesProjection,
};
use plaza_infra::read_model::InMemoryReadStore;
use plaza_infra::settlement::{
    CheckoutService, DisputeService, FulfilmentService, InMemoryCheckoutDrafts,
    InMemoryPromoCodes, InMemoryShippingRules, InvoicingRunService, PayoutRunService,
    ReconciliationService, RecordingNotifications, SelectionRegistry, SettlementConfig,
    SnapshotService, StaticDirectory,
};
use plaza_infra::workers::ProjectionWorker;

pub type ApiStore = Arc<InMemoryEventStore>;
pub type ApiBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type ApiDispatcher = CommandDispatcher<ApiStore, ApiBus>;

/// Everything the route handlers reach for.
pub struct AppServices {
    pub dispatcher: Arc<ApiDispatcher>,
    pub event_store: ApiStore,
    pub drafts: Arc<InMemoryCheckoutDrafts>,
    pub shipping_rules: Arc<InMemoryShippingRules>,
    pub promos: Arc<InMemoryPromoCodes>,
    pub directory: Arc<StaticDirectory>,
    pub orders: SharedOrdersProjection,
    pub escrow: SharedEscrowEntriesProjection,
    pub payouts: SharedPayoutSchedulesProjection,
    pub invoices: SharedInvoicesProjection,
    pub disputes_rm: SharedDisputesProjection,
    pub checkout: CheckoutService<ApiStore, ApiBus>,
    pub reconciliation: ReconciliationService<ApiStore, ApiBus>,
    pub fulfilment: FulfilmentService<ApiStore, ApiBus>,
    pub payout_run: Arc<PayoutRunService<ApiStore, ApiBus>>,
    pub invoicing_run: Arc<InvoicingRunService<ApiStore, ApiBus>>,
    pub disputes: DisputeService<ApiStore, ApiBus>,
    pub snapshots: SnapshotService,
    pub jobs: Arc<InMemoryJobStore>,
    _worker: ProjectionWorker,
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn settlement_config() -> SettlementConfig {
    let default_bps = env_u32("PLAZA_COMMISSION_BPS", 1_000);
    // Per-seller overrides arrive through ops tooling; with none configured
    // the table policy charges the default rate everywhere.
    let commission = Arc::new(TableCommissionPolicy::new(default_bps));

    SettlementConfig::new(commission)
        .with_hold_days(env_i64("PLAZA_ESCROW_HOLD_DAYS", 7))
        .with_payout_period_days(env_i64("PLAZA_PAYOUT_PERIOD_DAYS", 7))
        .with_invoice_period_days(env_i64("PLAZA_INVOICE_PERIOD_DAYS", 30))
}

/// In-memory wiring (dev/test): store + bus + projections + services.
pub fn build_services() -> AppServices {
    let config = settlement_config();

    let store: ApiStore = Arc::new(InMemoryEventStore::new());
    let bus: ApiBus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));

    let orders: SharedOrdersProjection =
        Arc::new(OrdersProjection::new(Arc::new(InMemoryReadStore::new())));
    let escrow: SharedEscrowEntriesProjection = Arc::new(EscrowEntriesProjection::new(Arc::new(
        InMemoryReadStore::new(),
    )));
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
    let shipping_rules = Arc::new(InMemoryShippingRules::new());
    let promos = Arc::new(InMemoryPromoCodes::new());
    let directory = Arc::new(StaticDirectory::new());
    let notifications = Arc::new(RecordingNotifications::new());

    let checkout = CheckoutService::new(dispatcher.clone(), registry.clone());
    let reconciliation = ReconciliationService::new(
        dispatcher.clone(),
        registry,
        drafts.clone(),
        shipping_rules.clone(),
        promos.clone(),
        directory.clone(),
        notifications,
        config.clone(),
    );
    let fulfilment = FulfilmentService::new(dispatcher.clone(), config.clone());
    let payout_run = Arc::new(PayoutRunService::new(
        dispatcher.clone(),
        escrow.clone(),
        config.clone(),
    ));
    let invoicing_run = Arc::new(InvoicingRunService::new(
        dispatcher.clone(),
        escrow.clone(),
        config,
    ));
    let disputes = DisputeService::new(dispatcher.clone(), disputes_rm.clone());
    let snapshots = SnapshotService::new(
        orders.clone(),
        escrow.clone(),
        payouts.clone(),
        invoices.clone(),
        disputes_rm.clone(),
        directory.clone(),
    );

    let jobs = InMemoryJobStore::arc();
    spawn_scheduler(
        jobs.clone(),
        payout_run.clone(),
        invoicing_run.clone(),
        vec![
            orders.clone() as Arc<dyn EnvelopeConsumer>,
            escrow.clone() as Arc<dyn EnvelopeConsumer>,
            payouts.clone() as Arc<dyn EnvelopeConsumer>,
            invoices.clone() as Arc<dyn EnvelopeConsumer>,
            disputes_rm.clone() as Arc<dyn EnvelopeConsumer>,
        ],
        store.clone(),
    );

    AppServices {
        dispatcher,
        event_store: store,
        drafts,
        shipping_rules,
        promos,
        directory,
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
        jobs,
        _worker: worker,
    }
}

/// The periodic scheduler: enqueues payout/invoicing runs on an interval and
/// drains the job queue, with the executor's retry policy backing off
/// failures. Payout re-attempts arrive as `PayoutRetry` jobs enqueued when a
/// batch is marked failed.
fn spawn_scheduler(
    jobs: Arc<InMemoryJobStore>,
    payout_run: Arc<PayoutRunService<ApiStore, ApiBus>>,
    invoicing_run: Arc<InvoicingRunService<ApiStore, ApiBus>>,
    consumers: Vec<Arc<dyn EnvelopeConsumer>>,
    store: ApiStore,
) {
    let mut executor = JobExecutor::new(jobs.clone(), RetryPolicy::default());

    {
        let payout_run = payout_run.clone();
        executor.register("payout_run", move |_| {
            payout_run
                .run(Utc::now())
                .map(|_| ())
                .map_err(|e| format!("{e:?}"))
        });
    }
    {
        let payout_run = payout_run.clone();
        executor.register("payout_retry", move |job| match &job.kind {
            JobKind::PayoutRetry { schedule_id } => payout_run
                .start_processing(*schedule_id, Utc::now())
                .map_err(|e| format!("{e:?}")),
            other => Err(format!("payout_retry handler got {other:?}")),
        });
    }
    executor.register("invoicing_run", move |_| {
        invoicing_run
            .run(Utc::now())
            .map(|_| ())
            .map_err(|e| format!("{e:?}"))
    });
    executor.register("projection_rebuild", move |_| {
        plaza_infra::projections::rebuild_from_events(&consumers, store.all_events());
        Ok(())
    });

    let interval = std::time::Duration::from_secs(
        std::env::var("PLAZA_RUN_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
    );

    std::thread::spawn(move || loop {
        std::thread::sleep(interval);
        let now = Utc::now();
        let _ = jobs.enqueue(Job::new(JobKind::PayoutRun, now));
        let _ = jobs.enqueue(Job::new(JobKind::InvoicingRun, now));
        let ran = executor.run_due(now);
        tracing::debug!(ran, "scheduler tick");
    });
}

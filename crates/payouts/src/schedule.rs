use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plaza_core::money::Amount;
use plaza_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Entity, SellerId, ValueObject};
use plaza_events::Event;
use plaza_orders::{OrderId, SellerOrderId};

/// Namespace for deriving a schedule id from (seller, period start).
///
/// One schedule per (seller, period): the payout run always lands on the same
/// stream for the same pair, so concurrent or replayed runs cannot fork a
/// second batch.
pub const PAYOUT_NAMESPACE: Uuid = Uuid::from_u128(0x3d8b_2c71_e4f5_4a09_b6d2_0f1e2a3b4c5d);

/// Half-open payout period `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ValueObject for PayoutPeriod {}

impl PayoutPeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Schedule lifecycle. Failed schedules keep their items and may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Processing,
    Paid,
    Failed,
}

/// One schedule line, linking exactly one escrow entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutScheduleItem {
    pub item_id: Uuid,
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    /// The escrow entry's seller-payout share at scheduling time.
    pub amount: Amount,
}

impl Entity for PayoutScheduleItem {
    type Id = Uuid;

    fn id(&self) -> &Self::Id {
        &self.item_id
    }
}

/// Aggregate root: PayoutSchedule (one per seller and period).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutSchedule {
    id: AggregateId,
    seller_id: Option<SellerId>,
    period: Option<PayoutPeriod>,
    items: Vec<PayoutScheduleItem>,
    total_amount: Amount,
    status: ScheduleStatus,
    attempt_count: u32,
    created_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    last_failure: Option<String>,
    version: u64,
    created: bool,
}

impl PayoutSchedule {
    /// Empty aggregate for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            seller_id: None,
            period: None,
            items: Vec::new(),
            total_amount: 0,
            status: ScheduleStatus::Scheduled,
            attempt_count: 0,
            created_at: None,
            paid_at: None,
            last_failure: None,
            version: 0,
            created: false,
        }
    }

    /// Deterministic schedule id for (seller, period start).
    pub fn schedule_id_for(seller_id: SellerId, period_start: DateTime<Utc>) -> AggregateId {
        let key = format!("{seller_id}:{}", period_start.timestamp());
        AggregateId::derived(&PAYOUT_NAMESPACE, key.as_bytes())
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn seller_id(&self) -> Option<SellerId> {
        self.seller_id
    }

    pub fn period(&self) -> Option<PayoutPeriod> {
        self.period
    }

    pub fn items(&self) -> &[PayoutScheduleItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    fn has_entry(&self, seller_order_id: SellerOrderId) -> bool {
        self.items
            .iter()
            .any(|i| i.seller_order_id == seller_order_id)
    }
}

impl AggregateRoot for PayoutSchedule {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenSchedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSchedule {
    pub seller_id: SellerId,
    pub period: PayoutPeriod,
    pub items: Vec<PayoutScheduleItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItems — late-arriving eligible entries join while the batch
/// has not started processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItems {
    pub items: Vec<PayoutScheduleItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartProcessing (also the retry path from Failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProcessing {
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkFailed {
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleCommand {
    OpenSchedule(OpenSchedule),
    AddItems(AddItems),
    StartProcessing(StartProcessing),
    MarkPaid(MarkPaid),
    MarkFailed(MarkFailed),
}

/// Event: ScheduleOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOpened {
    pub seller_id: SellerId,
    pub period: PayoutPeriod,
    pub items: Vec<PayoutScheduleItem>,
    pub total_amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsAdded {
    pub items: Vec<PayoutScheduleItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcessingStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStarted {
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SchedulePaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePaid {
    pub occurred_at: DateTime<Utc>,
}

/// Event: ScheduleFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFailed {
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    ScheduleOpened(ScheduleOpened),
    ItemsAdded(ItemsAdded),
    ProcessingStarted(ProcessingStarted),
    SchedulePaid(SchedulePaid),
    ScheduleFailed(ScheduleFailed),
}

impl Event for ScheduleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScheduleEvent::ScheduleOpened(_) => "payouts.schedule.opened",
            ScheduleEvent::ItemsAdded(_) => "payouts.schedule.items_added",
            ScheduleEvent::ProcessingStarted(_) => "payouts.schedule.processing_started",
            ScheduleEvent::SchedulePaid(_) => "payouts.schedule.paid",
            ScheduleEvent::ScheduleFailed(_) => "payouts.schedule.failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ScheduleEvent::ScheduleOpened(e) => e.occurred_at,
            ScheduleEvent::ItemsAdded(e) => e.occurred_at,
            ScheduleEvent::ProcessingStarted(e) => e.occurred_at,
            ScheduleEvent::SchedulePaid(e) => e.occurred_at,
            ScheduleEvent::ScheduleFailed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PayoutSchedule {
    type Command = ScheduleCommand;
    type Event = ScheduleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ScheduleEvent::ScheduleOpened(e) => {
                self.seller_id = Some(e.seller_id);
                self.period = Some(e.period);
                self.items = e.items.clone();
                self.total_amount = e.total_amount;
                self.status = ScheduleStatus::Scheduled;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ScheduleEvent::ItemsAdded(e) => {
                for item in &e.items {
                    self.total_amount += item.amount;
                    self.items.push(item.clone());
                }
            }
            ScheduleEvent::ProcessingStarted(e) => {
                self.status = ScheduleStatus::Processing;
                self.attempt_count = e.attempt;
            }
            ScheduleEvent::SchedulePaid(e) => {
                self.status = ScheduleStatus::Paid;
                self.paid_at = Some(e.occurred_at);
            }
            ScheduleEvent::ScheduleFailed(e) => {
                self.status = ScheduleStatus::Failed;
                self.last_failure = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ScheduleCommand::OpenSchedule(cmd) => self.handle_open(cmd),
            ScheduleCommand::AddItems(cmd) => self.handle_add_items(cmd),
            ScheduleCommand::StartProcessing(cmd) => self.handle_start(cmd),
            ScheduleCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            ScheduleCommand::MarkFailed(cmd) => self.handle_mark_failed(cmd),
        }
    }
}

impl PayoutSchedule {
    fn validate_items(&self, items: &[PayoutScheduleItem]) -> Result<Amount, DomainError> {
        let mut total: Amount = 0;
        for (idx, item) in items.iter().enumerate() {
            if item.amount == 0 {
                return Err(DomainError::validation("payout item amount must be positive"));
            }
            if items[..idx]
                .iter()
                .any(|other| other.seller_order_id == item.seller_order_id)
            {
                return Err(DomainError::invariant(
                    "duplicate escrow entry in payout batch",
                ));
            }
            total = total
                .checked_add(item.amount)
                .ok_or_else(|| DomainError::invariant("payout total overflow"))?;
        }
        Ok(total)
    }

    fn handle_open(&self, cmd: &OpenSchedule) -> Result<Vec<ScheduleEvent>, DomainError> {
        // Re-running the payout run for the same (seller, period) lands here.
        if self.created {
            return Ok(vec![]);
        }

        if cmd.items.is_empty() {
            return Err(DomainError::validation("payout schedule requires items"));
        }
        if cmd.period.start >= cmd.period.end {
            return Err(DomainError::validation("payout period must not be empty"));
        }
        let total_amount = self.validate_items(&cmd.items)?;

        Ok(vec![ScheduleEvent::ScheduleOpened(ScheduleOpened {
            seller_id: cmd.seller_id,
            period: cmd.period,
            items: cmd.items.clone(),
            total_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_items(&self, cmd: &AddItems) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status != ScheduleStatus::Scheduled {
            return Err(DomainError::invalid_transition(
                "items can only join a schedule that has not started processing",
            ));
        }

        let fresh: Vec<PayoutScheduleItem> = cmd
            .items
            .iter()
            .filter(|i| !self.has_entry(i.seller_order_id))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(vec![]);
        }
        self.validate_items(&fresh)?;

        Ok(vec![ScheduleEvent::ItemsAdded(ItemsAdded {
            items: fresh,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start(&self, cmd: &StartProcessing) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        match self.status {
            ScheduleStatus::Processing => Ok(vec![]),
            ScheduleStatus::Scheduled | ScheduleStatus::Failed => {
                Ok(vec![ScheduleEvent::ProcessingStarted(ProcessingStarted {
                    attempt: self.attempt_count + 1,
                    occurred_at: cmd.occurred_at,
                })])
            }
            ScheduleStatus::Paid => Err(DomainError::invalid_transition(
                "paid schedules cannot be reprocessed",
            )),
        }
    }

    fn handle_mark_paid(&self, cmd: &MarkPaid) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        match self.status {
            ScheduleStatus::Paid => Ok(vec![]),
            ScheduleStatus::Processing => Ok(vec![ScheduleEvent::SchedulePaid(SchedulePaid {
                occurred_at: cmd.occurred_at,
            })]),
            other => Err(DomainError::invalid_transition(format!(
                "cannot mark a {other:?} schedule paid"
            ))),
        }
    }

    fn handle_mark_failed(&self, cmd: &MarkFailed) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        match self.status {
            ScheduleStatus::Failed => Ok(vec![]),
            ScheduleStatus::Processing => {
                Ok(vec![ScheduleEvent::ScheduleFailed(ScheduleFailed {
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            other => Err(DomainError::invalid_transition(format!(
                "cannot mark a {other:?} schedule failed"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn period() -> PayoutPeriod {
        let start = test_time();
        PayoutPeriod {
            start,
            end: start + Duration::days(7),
        }
    }

    fn item(amount: Amount) -> PayoutScheduleItem {
        PayoutScheduleItem {
            item_id: Uuid::now_v7(),
            order_id: OrderId::new(AggregateId::new()),
            seller_order_id: SellerOrderId::new(AggregateId::new()),
            amount,
        }
    }

    fn opened_schedule(items: Vec<PayoutScheduleItem>) -> PayoutSchedule {
        let seller = SellerId::new();
        let p = period();
        let id = PayoutSchedule::schedule_id_for(seller, p.start);
        let mut schedule = PayoutSchedule::empty(id);
        plaza_events::execute(
            &mut schedule,
            &ScheduleCommand::OpenSchedule(OpenSchedule {
                seller_id: seller,
                period: p,
                items,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        schedule
    }

    #[test]
    fn schedule_id_is_stable_per_seller_and_period() {
        let seller = SellerId::new();
        let start = test_time();
        assert_eq!(
            PayoutSchedule::schedule_id_for(seller, start),
            PayoutSchedule::schedule_id_for(seller, start)
        );
        assert_ne!(
            PayoutSchedule::schedule_id_for(seller, start),
            PayoutSchedule::schedule_id_for(SellerId::new(), start)
        );
    }

    #[test]
    fn open_sums_items_and_replays_to_nothing() {
        let schedule = opened_schedule(vec![item(7_200), item(3_600)]);

        assert_eq!(schedule.total_amount(), 10_800);
        assert_eq!(schedule.status(), ScheduleStatus::Scheduled);
        assert_eq!(schedule.items().len(), 2);

        let replay = schedule
            .handle(&ScheduleCommand::OpenSchedule(OpenSchedule {
                seller_id: schedule.seller_id().unwrap(),
                period: schedule.period().unwrap(),
                items: vec![item(1)],
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }

    #[test]
    fn duplicate_escrow_entry_in_batch_is_rejected() {
        let shared = item(500);
        let mut duplicate = item(700);
        duplicate.seller_order_id = shared.seller_order_id;

        let seller = SellerId::new();
        let p = period();
        let schedule = PayoutSchedule::empty(PayoutSchedule::schedule_id_for(seller, p.start));
        let err = schedule
            .handle(&ScheduleCommand::OpenSchedule(OpenSchedule {
                seller_id: seller,
                period: p,
                items: vec![shared, duplicate],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn add_items_skips_entries_already_batched() {
        let existing = item(500);
        let mut schedule = opened_schedule(vec![existing.clone()]);

        let fresh = item(800);
        let events = schedule
            .handle(&ScheduleCommand::AddItems(AddItems {
                items: vec![existing.clone(), fresh],
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            schedule.apply(e);
        }
        assert_eq!(schedule.items().len(), 2);
        assert_eq!(schedule.total_amount(), 1_300);

        let replay = schedule
            .handle(&ScheduleCommand::AddItems(AddItems {
                items: vec![existing],
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }

    #[test]
    fn lifecycle_scheduled_processing_paid() {
        let mut schedule = opened_schedule(vec![item(500)]);

        for cmd in [
            ScheduleCommand::StartProcessing(StartProcessing {
                occurred_at: test_time(),
            }),
            ScheduleCommand::MarkPaid(MarkPaid {
                occurred_at: test_time(),
            }),
        ] {
            let events = schedule.handle(&cmd).unwrap();
            for e in &events {
                schedule.apply(e);
            }
        }

        assert_eq!(schedule.status(), ScheduleStatus::Paid);
        assert_eq!(schedule.attempt_count(), 1);
        assert!(schedule.paid_at().is_some());
    }

    #[test]
    fn failure_increments_attempts_and_allows_retry() {
        let mut schedule = opened_schedule(vec![item(500)]);

        for cmd in [
            ScheduleCommand::StartProcessing(StartProcessing {
                occurred_at: test_time(),
            }),
            ScheduleCommand::MarkFailed(MarkFailed {
                reason: "bank rejected transfer".to_string(),
                occurred_at: test_time(),
            }),
            ScheduleCommand::StartProcessing(StartProcessing {
                occurred_at: test_time(),
            }),
            ScheduleCommand::MarkPaid(MarkPaid {
                occurred_at: test_time(),
            }),
        ] {
            let events = schedule.handle(&cmd).unwrap();
            for e in &events {
                schedule.apply(e);
            }
        }

        assert_eq!(schedule.status(), ScheduleStatus::Paid);
        assert_eq!(schedule.attempt_count(), 2);
        assert_eq!(schedule.last_failure(), Some("bank rejected transfer"));
    }

    #[test]
    fn cannot_pay_a_schedule_that_never_started() {
        let schedule = opened_schedule(vec![item(500)]);
        let err = schedule
            .handle(&ScheduleCommand::MarkPaid(MarkPaid {
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn items_cannot_join_after_processing_starts() {
        let mut schedule = opened_schedule(vec![item(500)]);
        let events = schedule
            .handle(&ScheduleCommand::StartProcessing(StartProcessing {
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            schedule.apply(e);
        }

        let err = schedule
            .handle(&ScheduleCommand::AddItems(AddItems {
                items: vec![item(800)],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn paid_schedules_are_terminal() {
        let mut schedule = opened_schedule(vec![item(500)]);
        for cmd in [
            ScheduleCommand::StartProcessing(StartProcessing {
                occurred_at: test_time(),
            }),
            ScheduleCommand::MarkPaid(MarkPaid {
                occurred_at: test_time(),
            }),
        ] {
            let events = schedule.handle(&cmd).unwrap();
            for e in &events {
                schedule.apply(e);
            }
        }

        let err = schedule
            .handle(&ScheduleCommand::StartProcessing(StartProcessing {
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let replay = schedule
            .handle(&ScheduleCommand::MarkPaid(MarkPaid {
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }
}

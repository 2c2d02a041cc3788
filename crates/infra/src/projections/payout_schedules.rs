use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use plaza_core::{AggregateId, SellerId};
use plaza_events::EventEnvelope;
use plaza_orders::{OrderId, SellerOrderId};
use plaza_payouts::{ScheduleEvent, ScheduleStatus};

use crate::read_model::ReadStore;
use crate::settlement::AGG_PAYOUT;

use super::{EnvelopeConsumer, ProjectionApplyError, StreamCursors};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutItemReadModel {
    pub item_id: Uuid,
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub amount: u64,
}

/// One payout batch, as the read side sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutScheduleReadModel {
    pub schedule_id: AggregateId,
    pub seller_id: SellerId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_amount: u64,
    pub status: ScheduleStatus,
    pub attempt_count: u32,
    pub last_failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub items: Vec<PayoutItemReadModel>,
}

/// Projection: payouts.schedule events → `PayoutScheduleReadModel`.
#[derive(Debug)]
pub struct PayoutSchedulesProjection<S>
where
    S: ReadStore<AggregateId, PayoutScheduleReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PayoutSchedulesProjection<S>
where
    S: ReadStore<AggregateId, PayoutScheduleReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, schedule_id: &AggregateId) -> Option<PayoutScheduleReadModel> {
        self.store.get(schedule_id)
    }

    pub fn list_for_seller(&self, seller_id: SellerId) -> Vec<PayoutScheduleReadModel> {
        let mut schedules: Vec<PayoutScheduleReadModel> = self
            .store
            .list()
            .into_iter()
            .filter(|s| s.seller_id == seller_id)
            .collect();
        schedules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        schedules
    }

    /// Failed batches awaiting a re-attempt.
    pub fn retriable(&self) -> Vec<PayoutScheduleReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|s| s.status == ScheduleStatus::Failed)
            .collect()
    }

    fn fold(&self, schedule_id: AggregateId, event: &ScheduleEvent) {
        match event {
            ScheduleEvent::ScheduleOpened(e) => {
                self.store.upsert(
                    schedule_id,
                    PayoutScheduleReadModel {
                        schedule_id,
                        seller_id: e.seller_id,
                        period_start: e.period.start,
                        period_end: e.period.end,
                        total_amount: e.total_amount,
                        status: ScheduleStatus::Scheduled,
                        attempt_count: 0,
                        last_failure: None,
                        created_at: e.occurred_at,
                        paid_at: None,
                        items: e
                            .items
                            .iter()
                            .map(|i| PayoutItemReadModel {
                                item_id: i.item_id,
                                order_id: i.order_id,
                                seller_order_id: i.seller_order_id,
                                amount: i.amount,
                            })
                            .collect(),
                    },
                );
            }
            ScheduleEvent::ItemsAdded(e) => {
                if let Some(mut model) = self.store.get(&schedule_id) {
                    for item in &e.items {
                        model.total_amount += item.amount;
                        model.items.push(PayoutItemReadModel {
                            item_id: item.item_id,
                            order_id: item.order_id,
                            seller_order_id: item.seller_order_id,
                            amount: item.amount,
                        });
                    }
                    self.store.upsert(schedule_id, model);
                }
            }
            ScheduleEvent::ProcessingStarted(e) => {
                if let Some(mut model) = self.store.get(&schedule_id) {
                    model.status = ScheduleStatus::Processing;
                    model.attempt_count = e.attempt;
                    self.store.upsert(schedule_id, model);
                }
            }
            ScheduleEvent::SchedulePaid(e) => {
                if let Some(mut model) = self.store.get(&schedule_id) {
                    model.status = ScheduleStatus::Paid;
                    model.paid_at = Some(e.occurred_at);
                    self.store.upsert(schedule_id, model);
                }
            }
            ScheduleEvent::ScheduleFailed(e) => {
                if let Some(mut model) = self.store.get(&schedule_id) {
                    model.status = ScheduleStatus::Failed;
                    model.last_failure = Some(e.reason.clone());
                    self.store.upsert(schedule_id, model);
                }
            }
        }
    }
}

impl<S> EnvelopeConsumer for PayoutSchedulesProjection<S>
where
    S: ReadStore<AggregateId, PayoutScheduleReadModel>,
{
    fn name(&self) -> &str {
        "payout_schedules"
    }

    fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }

    fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        if envelope.aggregate_type() != AGG_PAYOUT {
            return Ok(());
        }
        if !self.cursors.advance(envelope)? {
            return Ok(());
        }

        let event: ScheduleEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;
        self.fold(envelope.aggregate_id(), &event);
        Ok(())
    }
}

//! Periodic payout batching.
//!
//! Selects held escrow entries whose eligibility date has been reached and
//! that belong to no schedule item yet, groups them by seller and folds them
//! into one schedule per (seller, period). The schedule id is derived from
//! that pair, so a re-run (or a crashed run resumed) converges onto the same
//! batch instead of paying twice; the escrow aggregate refuses a second
//! schedule link outright.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use plaza_core::{AggregateId, SellerId};
use plaza_escrow::{EscrowAccount, EscrowCommand, MarkScheduled, ReleaseToSeller};
use plaza_events::{EventBus, EventEnvelope};
use plaza_payouts::{
    AddItems, MarkFailed, MarkPaid, OpenSchedule, PayoutPeriod, PayoutSchedule,
    PayoutScheduleItem, ScheduleCommand, ScheduleStatus, StartProcessing, PAYOUT_NAMESPACE,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{EscrowEntryReadModel, SharedEscrowEntriesProjection};
use crate::settlement::config::SettlementConfig;
use crate::settlement::{period_containing, with_conflict_retry, AGG_ESCROW, AGG_PAYOUT};

/// What one payout run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayoutRunReport {
    /// (schedule id, seller, entries batched this run).
    pub batched: Vec<(AggregateId, SellerId, usize)>,
    /// Entries skipped because their batch already started processing.
    pub deferred: usize,
}

pub struct PayoutRunService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    escrow_entries: SharedEscrowEntriesProjection,
    config: SettlementConfig,
}

impl<S, B> PayoutRunService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        escrow_entries: SharedEscrowEntriesProjection,
        config: SettlementConfig,
    ) -> Self {
        Self {
            dispatcher,
            escrow_entries,
            config,
        }
    }

    /// Deterministic schedule item id for an escrow entry.
    fn item_id_for(entry: &EscrowEntryReadModel) -> Uuid {
        Uuid::new_v5(
            &PAYOUT_NAMESPACE,
            entry.seller_order_id.to_string().as_bytes(),
        )
    }

    /// Batch every currently eligible, unscheduled escrow entry.
    pub fn run(&self, now: DateTime<Utc>) -> Result<PayoutRunReport, DispatchError> {
        let candidates = self.escrow_entries.payout_candidates(now);
        let mut by_seller: HashMap<SellerId, Vec<EscrowEntryReadModel>> = HashMap::new();
        for entry in candidates {
            by_seller.entry(entry.seller_id).or_default().push(entry);
        }

        let (start, end) = period_containing(now, self.config.payout_period_days);
        let period = PayoutPeriod { start, end };
        let mut report = PayoutRunReport::default();

        for (seller_id, entries) in by_seller {
            let schedule_id = PayoutSchedule::schedule_id_for(seller_id, start);
            let items: Vec<PayoutScheduleItem> = entries
                .iter()
                .map(|e| PayoutScheduleItem {
                    item_id: Self::item_id_for(e),
                    order_id: e.order_id,
                    seller_order_id: e.seller_order_id,
                    amount: e.seller_payout_amount,
                })
                .collect();

            let joined = with_conflict_retry(|| {
                self.join_schedule(schedule_id, seller_id, period, &items)
            })?;
            if !joined {
                report.deferred += entries.len();
                continue;
            }

            for (entry, item) in entries.iter().zip(&items) {
                self.link_entry(entry, schedule_id, item.item_id, now)?;
            }

            tracing::info!(
                %schedule_id,
                seller = %seller_id,
                entries = entries.len(),
                "payout batch assembled"
            );
            report.batched.push((schedule_id, seller_id, entries.len()));
        }

        Ok(report)
    }

    /// Open the (seller, period) schedule or add items to it while it has
    /// not started processing. Returns false when the batch is closed.
    fn join_schedule(
        &self,
        schedule_id: AggregateId,
        seller_id: SellerId,
        period: PayoutPeriod,
        items: &[PayoutScheduleItem],
    ) -> Result<bool, DispatchError> {
        let schedule = self
            .dispatcher
            .load::<PayoutSchedule>(schedule_id, PayoutSchedule::empty)?;

        if !schedule.exists() {
            self.dispatcher.dispatch::<PayoutSchedule>(
                schedule_id,
                AGG_PAYOUT,
                ScheduleCommand::OpenSchedule(OpenSchedule {
                    seller_id,
                    period,
                    items: items.to_vec(),
                    occurred_at: period.start,
                }),
                PayoutSchedule::empty,
            )?;
            return Ok(true);
        }

        if schedule.status() == ScheduleStatus::Scheduled {
            self.dispatcher.dispatch::<PayoutSchedule>(
                schedule_id,
                AGG_PAYOUT,
                ScheduleCommand::AddItems(AddItems {
                    items: items.to_vec(),
                    occurred_at: period.start,
                }),
                PayoutSchedule::empty,
            )?;
            return Ok(true);
        }

        // Batch already processing/paid; the entries wait for the next window.
        Ok(false)
    }

    fn link_entry(
        &self,
        entry: &EscrowEntryReadModel,
        schedule_id: AggregateId,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let account_id = EscrowAccount::account_id_for(entry.order_id);
        let result = with_conflict_retry(|| {
            self.dispatcher.dispatch::<EscrowAccount>(
                account_id,
                AGG_ESCROW,
                EscrowCommand::MarkScheduled(MarkScheduled {
                    seller_order_id: entry.seller_order_id,
                    schedule_id,
                    item_id,
                    occurred_at: now,
                }),
                EscrowAccount::empty,
            )
        });

        match result {
            Ok(_) => Ok(()),
            // The entry was linked elsewhere between the read-model snapshot
            // and this write (the aggregate-level uniqueness guard). It is
            // not part of this batch; leave it to its owner.
            Err(DispatchError::Concurrency(msg)) => {
                tracing::warn!(
                    seller_order = %entry.seller_order_id,
                    %msg,
                    "escrow entry not linked this run"
                );
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Start (or retry) processing a batch.
    pub fn start_processing(
        &self,
        schedule_id: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<PayoutSchedule>(
                    schedule_id,
                    AGG_PAYOUT,
                    ScheduleCommand::StartProcessing(StartProcessing { occurred_at: now }),
                    PayoutSchedule::empty,
                )
                .map(|_| ())
        })
    }

    /// The transfer for a batch completed: mark it paid and release every
    /// linked escrow entry to its seller.
    pub fn mark_paid(
        &self,
        schedule_id: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<PayoutSchedule>(
                    schedule_id,
                    AGG_PAYOUT,
                    ScheduleCommand::MarkPaid(MarkPaid { occurred_at: now }),
                    PayoutSchedule::empty,
                )
                .map(|_| ())
        })?;

        let schedule = self
            .dispatcher
            .load::<PayoutSchedule>(schedule_id, PayoutSchedule::empty)?;

        for item in schedule.items() {
            let account_id = EscrowAccount::account_id_for(item.order_id);
            let result = with_conflict_retry(|| {
                self.dispatcher.dispatch::<EscrowAccount>(
                    account_id,
                    AGG_ESCROW,
                    EscrowCommand::ReleaseToSeller(ReleaseToSeller {
                        seller_order_id: item.seller_order_id,
                        occurred_at: now,
                    }),
                    EscrowAccount::empty,
                )
            });

            if let Err(DispatchError::InvariantViolation(msg)) = &result {
                // A refund beat the payout to this entry; the funds went
                // back to the buyer and there is nothing left to release.
                tracing::warn!(
                    seller_order = %item.seller_order_id,
                    %msg,
                    "escrow entry not released with its batch"
                );
                continue;
            }
            result?;
        }

        Ok(())
    }

    /// The transfer for a batch failed: record it and leave the batch
    /// retriable (the scheduler re-attempts it later).
    pub fn mark_failed(
        &self,
        schedule_id: AggregateId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let reason = reason.into();
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<PayoutSchedule>(
                    schedule_id,
                    AGG_PAYOUT,
                    ScheduleCommand::MarkFailed(MarkFailed {
                        reason: reason.clone(),
                        occurred_at: now,
                    }),
                    PayoutSchedule::empty,
                )
                .map(|_| ())
        })
    }
}

//! Periodic commission invoicing.
//!
//! Rolls escrow commission into one invoice per (seller, period). The period
//! is the one containing the escrow entry's creation time, so every run —
//! whenever it executes — lands an entry on the same invoice, and the
//! aggregate's one-charge-line-per-entry guard makes re-runs decide nothing.
//! When a refund has reduced commission below what was invoiced, the run
//! reconciles the difference as a credit note.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use plaza_events::{EventBus, EventEnvelope};
use plaza_invoicing::{
    AddCreditNote, AddLine, CommissionInvoice, Finalize, InvoiceCommand, InvoicePeriod,
    OpenInvoice,
};

use plaza_core::AggregateId;

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{EscrowEntryReadModel, SharedEscrowEntriesProjection};
use crate::settlement::config::SettlementConfig;
use crate::settlement::{period_containing, with_conflict_retry, AGG_INVOICE};

pub struct InvoicingRunService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    escrow_entries: SharedEscrowEntriesProjection,
    config: SettlementConfig,
}

impl<S, B> InvoicingRunService<S, B>
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

    fn invoice_ref(&self, entry: &EscrowEntryReadModel) -> (AggregateId, InvoicePeriod) {
        let (start, end) = period_containing(entry.created_at, self.config.invoice_period_days);
        let invoice_id = CommissionInvoice::invoice_id_for(entry.seller_id, start);
        (invoice_id, InvoicePeriod { start, end })
    }

    /// Roll commission for every escrow entry into its seller's invoice.
    pub fn run(&self, now: DateTime<Utc>) -> Result<usize, DispatchError> {
        let mut touched = 0usize;

        for entry in self.escrow_entries.list_all() {
            if self.reconcile_entry(&entry, now)? {
                touched += 1;
            }
        }

        Ok(touched)
    }

    /// Bring one entry's invoice line in sync with its current commission.
    pub fn reconcile_entry(
        &self,
        entry: &EscrowEntryReadModel,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        let (invoice_id, period) = self.invoice_ref(entry);

        with_conflict_retry(|| {
            let invoice = self
                .dispatcher
                .load::<CommissionInvoice>(invoice_id, CommissionInvoice::empty)?;

            let invoiced = invoice.invoiced_for(entry.seller_order_id);
            let has_line = invoiced != 0
                || invoice
                    .lines()
                    .iter()
                    .any(|l| l.seller_order_id == entry.seller_order_id);
            let target = entry.commission_amount as i64;

            // Nothing to invoice and nothing invoiced: skip entirely.
            if !has_line && target == 0 {
                return Ok(false);
            }

            if !invoice.exists() {
                self.dispatcher.dispatch::<CommissionInvoice>(
                    invoice_id,
                    AGG_INVOICE,
                    InvoiceCommand::OpenInvoice(OpenInvoice {
                        seller_id: entry.seller_id,
                        period,
                        occurred_at: now,
                    }),
                    CommissionInvoice::empty,
                )?;
            }

            if !has_line {
                self.dispatcher.dispatch::<CommissionInvoice>(
                    invoice_id,
                    AGG_INVOICE,
                    InvoiceCommand::AddLine(AddLine {
                        order_id: entry.order_id,
                        seller_order_id: entry.seller_order_id,
                        amount: entry.commission_amount,
                        occurred_at: now,
                    }),
                    CommissionInvoice::empty,
                )?;
                return Ok(true);
            }

            // Already invoiced; a refund may have clawed back commission.
            if invoiced > target {
                self.dispatcher.dispatch::<CommissionInvoice>(
                    invoice_id,
                    AGG_INVOICE,
                    InvoiceCommand::AddCreditNote(AddCreditNote {
                        order_id: entry.order_id,
                        seller_order_id: entry.seller_order_id,
                        amount: (invoiced - target) as u64,
                        reason: "commission reduced by refund".to_string(),
                        occurred_at: now,
                    }),
                    CommissionInvoice::empty,
                )?;
                return Ok(true);
            }

            Ok(false)
        })
    }

    /// Close an invoice once its period has ended.
    pub fn finalize_invoice(
        &self,
        invoice_id: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry(|| {
            self.dispatcher
                .dispatch::<CommissionInvoice>(
                    invoice_id,
                    AGG_INVOICE,
                    InvoiceCommand::Finalize(Finalize { occurred_at: now }),
                    CommissionInvoice::empty,
                )
                .map(|_| ())
        })
    }
}

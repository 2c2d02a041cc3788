use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use plaza_core::{AggregateId, SellerId};
use plaza_events::EventEnvelope;
use plaza_invoicing::{CommissionInvoiceLine, InvoiceEvent, InvoiceStatus};

use crate::read_model::ReadStore;
use crate::settlement::AGG_INVOICE;

use super::{EnvelopeConsumer, ProjectionApplyError, StreamCursors};

/// One commission invoice, as the read side sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceReadModel {
    pub invoice_id: AggregateId,
    pub seller_id: SellerId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_commission: i64,
    pub status: InvoiceStatus,
    pub opened_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub lines: Vec<CommissionInvoiceLine>,
}

/// Projection: invoicing.invoice events → `InvoiceReadModel`.
#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: ReadStore<AggregateId, InvoiceReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InvoicesProjection<S>
where
    S: ReadStore<AggregateId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, invoice_id: &AggregateId) -> Option<InvoiceReadModel> {
        self.store.get(invoice_id)
    }

    pub fn list_for_seller(&self, seller_id: SellerId) -> Vec<InvoiceReadModel> {
        let mut invoices: Vec<InvoiceReadModel> = self
            .store
            .list()
            .into_iter()
            .filter(|i| i.seller_id == seller_id)
            .collect();
        invoices.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        invoices
    }

    fn push_line(&self, invoice_id: AggregateId, line: &CommissionInvoiceLine) {
        if let Some(mut model) = self.store.get(&invoice_id) {
            model.total_commission += line.amount;
            model.lines.push(line.clone());
            self.store.upsert(invoice_id, model);
        }
    }

    fn fold(&self, invoice_id: AggregateId, event: &InvoiceEvent) {
        match event {
            InvoiceEvent::InvoiceOpened(e) => {
                self.store.upsert(
                    invoice_id,
                    InvoiceReadModel {
                        invoice_id,
                        seller_id: e.seller_id,
                        period_start: e.period.start,
                        period_end: e.period.end,
                        total_commission: 0,
                        status: InvoiceStatus::Open,
                        opened_at: e.occurred_at,
                        finalized_at: None,
                        lines: Vec::new(),
                    },
                );
            }
            InvoiceEvent::LineAdded(e) => self.push_line(invoice_id, &e.line),
            InvoiceEvent::CreditNoteAdded(e) => self.push_line(invoice_id, &e.line),
            InvoiceEvent::InvoiceFinalized(e) => {
                if let Some(mut model) = self.store.get(&invoice_id) {
                    model.status = InvoiceStatus::Finalized;
                    model.finalized_at = Some(e.occurred_at);
                    self.store.upsert(invoice_id, model);
                }
            }
        }
    }
}

impl<S> EnvelopeConsumer for InvoicesProjection<S>
where
    S: ReadStore<AggregateId, InvoiceReadModel>,
{
    fn name(&self) -> &str {
        "invoices"
    }

    fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }

    fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        if envelope.aggregate_type() != AGG_INVOICE {
            return Ok(());
        }
        if !self.cursors.advance(envelope)? {
            return Ok(());
        }

        let event: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;
        self.fold(envelope.aggregate_id(), &event);
        Ok(())
    }
}

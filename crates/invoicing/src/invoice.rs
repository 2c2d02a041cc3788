use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plaza_core::money::Amount;
use plaza_core::{Aggregate, AggregateId, AggregateRoot, DomainError, SellerId, ValueObject};
use plaza_events::Event;
use plaza_orders::{OrderId, SellerOrderId};

/// Namespace for deriving an invoice id from (seller, period start).
pub const INVOICE_NAMESPACE: Uuid = Uuid::from_u128(0x5f2e_8d94_1a6b_4c07_9e3d_b4c5d6e7f809);

/// Half-open invoicing period `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ValueObject for InvoicePeriod {}

/// Invoice lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Finalized,
}

/// One invoice line. Credit notes are negative corrections referencing the
/// same sub-order as the line they reduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionInvoiceLine {
    pub line_no: u32,
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    /// Commission in smallest currency unit; negative for credit notes.
    pub amount: i64,
    pub is_credit: bool,
    pub description: Option<String>,
}

/// Aggregate root: CommissionInvoice (one per seller and period).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionInvoice {
    id: AggregateId,
    seller_id: Option<SellerId>,
    period: Option<InvoicePeriod>,
    lines: Vec<CommissionInvoiceLine>,
    total_commission: i64,
    status: InvoiceStatus,
    opened_at: Option<DateTime<Utc>>,
    finalized_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl CommissionInvoice {
    /// Empty aggregate for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            seller_id: None,
            period: None,
            lines: Vec::new(),
            total_commission: 0,
            status: InvoiceStatus::Open,
            opened_at: None,
            finalized_at: None,
            version: 0,
            created: false,
        }
    }

    /// Deterministic invoice id for (seller, period start).
    pub fn invoice_id_for(seller_id: SellerId, period_start: DateTime<Utc>) -> AggregateId {
        let key = format!("{seller_id}:{}", period_start.timestamp());
        AggregateId::derived(&INVOICE_NAMESPACE, key.as_bytes())
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn seller_id(&self) -> Option<SellerId> {
        self.seller_id
    }

    pub fn period(&self) -> Option<InvoicePeriod> {
        self.period
    }

    pub fn lines(&self) -> &[CommissionInvoiceLine] {
        &self.lines
    }

    pub fn total_commission(&self) -> i64 {
        self.total_commission
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    /// Net commission still invoiced for one sub-order (line minus credits).
    pub fn invoiced_for(&self, seller_order_id: SellerOrderId) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.seller_order_id == seller_order_id)
            .map(|l| l.amount)
            .sum()
    }

    fn has_charge_line(&self, seller_order_id: SellerOrderId) -> bool {
        self.lines
            .iter()
            .any(|l| l.seller_order_id == seller_order_id && !l.is_credit)
    }
}

impl AggregateRoot for CommissionInvoice {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInvoice {
    pub seller_id: SellerId,
    pub period: InvoicePeriod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine — invoice one escrow entry's commission, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddCreditNote — claw back previously invoiced commission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCreditNote {
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub amount: Amount,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    OpenInvoice(OpenInvoice),
    AddLine(AddLine),
    AddCreditNote(AddCreditNote),
    Finalize(Finalize),
}

/// Event: InvoiceOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceOpened {
    pub seller_id: SellerId,
    pub period: InvoicePeriod,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub line: CommissionInvoiceLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CreditNoteAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteAdded {
    pub line: CommissionInvoiceLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFinalized {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceOpened(InvoiceOpened),
    LineAdded(LineAdded),
    CreditNoteAdded(CreditNoteAdded),
    InvoiceFinalized(InvoiceFinalized),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceOpened(_) => "invoicing.invoice.opened",
            InvoiceEvent::LineAdded(_) => "invoicing.invoice.line_added",
            InvoiceEvent::CreditNoteAdded(_) => "invoicing.invoice.credit_note_added",
            InvoiceEvent::InvoiceFinalized(_) => "invoicing.invoice.finalized",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceOpened(e) => e.occurred_at,
            InvoiceEvent::LineAdded(e) => e.occurred_at,
            InvoiceEvent::CreditNoteAdded(e) => e.occurred_at,
            InvoiceEvent::InvoiceFinalized(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CommissionInvoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceOpened(e) => {
                self.seller_id = Some(e.seller_id);
                self.period = Some(e.period);
                self.status = InvoiceStatus::Open;
                self.opened_at = Some(e.occurred_at);
                self.created = true;
            }
            InvoiceEvent::LineAdded(e) => {
                self.total_commission += e.line.amount;
                self.lines.push(e.line.clone());
            }
            InvoiceEvent::CreditNoteAdded(e) => {
                self.total_commission += e.line.amount;
                self.lines.push(e.line.clone());
            }
            InvoiceEvent::InvoiceFinalized(e) => {
                self.status = InvoiceStatus::Finalized;
                self.finalized_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::OpenInvoice(cmd) => self.handle_open(cmd),
            InvoiceCommand::AddLine(cmd) => self.handle_add_line(cmd),
            InvoiceCommand::AddCreditNote(cmd) => self.handle_add_credit(cmd),
            InvoiceCommand::Finalize(cmd) => self.handle_finalize(cmd),
        }
    }
}

impl CommissionInvoice {
    fn next_line_no(&self) -> u32 {
        (self.lines.len() as u32) + 1
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.status != InvoiceStatus::Open {
            return Err(DomainError::invariant(
                "finalized invoices are immutable; corrections go on the next period",
            ));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Ok(vec![]);
        }
        if cmd.period.start >= cmd.period.end {
            return Err(DomainError::validation("invoice period must not be empty"));
        }

        Ok(vec![InvoiceEvent::InvoiceOpened(InvoiceOpened {
            seller_id: cmd.seller_id,
            period: cmd.period,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_open()?;

        // One charge line per escrow entry; replays decide nothing.
        if self.has_charge_line(cmd.seller_order_id) {
            return Ok(vec![]);
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation(
                "invoice line amount must be positive",
            ));
        }

        Ok(vec![InvoiceEvent::LineAdded(LineAdded {
            line: CommissionInvoiceLine {
                line_no: self.next_line_no(),
                order_id: cmd.order_id,
                seller_order_id: cmd.seller_order_id,
                amount: cmd.amount as i64,
                is_credit: false,
                description: None,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_credit(&self, cmd: &AddCreditNote) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_open()?;

        if cmd.amount == 0 {
            return Err(DomainError::validation(
                "credit note amount must be positive",
            ));
        }
        if !self.has_charge_line(cmd.seller_order_id) {
            return Err(DomainError::invariant(
                "credit note requires a previously invoiced line for the sub-order",
            ));
        }
        let remaining = self.invoiced_for(cmd.seller_order_id);
        if (cmd.amount as i64) > remaining {
            return Err(DomainError::invariant(
                "credit note exceeds the invoiced commission for the sub-order",
            ));
        }

        Ok(vec![InvoiceEvent::CreditNoteAdded(CreditNoteAdded {
            line: CommissionInvoiceLine {
                line_no: self.next_line_no(),
                order_id: cmd.order_id,
                seller_order_id: cmd.seller_order_id,
                amount: -(cmd.amount as i64),
                is_credit: true,
                description: Some(cmd.reason.clone()),
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize(&self, cmd: &Finalize) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status == InvoiceStatus::Finalized {
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::InvoiceFinalized(InvoiceFinalized {
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_period() -> InvoicePeriod {
        let start = test_time();
        InvoicePeriod {
            start,
            end: start + Duration::days(30),
        }
    }

    fn sub_ref() -> (OrderId, SellerOrderId) {
        (
            OrderId::new(AggregateId::new()),
            SellerOrderId::new(AggregateId::new()),
        )
    }

    fn open_invoice() -> CommissionInvoice {
        let seller = SellerId::new();
        let period = test_period();
        let id = CommissionInvoice::invoice_id_for(seller, period.start);
        let mut invoice = CommissionInvoice::empty(id);
        let events = invoice
            .handle(&InvoiceCommand::OpenInvoice(OpenInvoice {
                seller_id: seller,
                period,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }
        invoice
    }

    #[test]
    fn open_is_idempotent_per_seller_period() {
        let invoice = open_invoice();
        assert!(invoice.exists());

        let replay = invoice
            .handle(&InvoiceCommand::OpenInvoice(OpenInvoice {
                seller_id: invoice.seller_id().unwrap(),
                period: invoice.period().unwrap(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }

    #[test]
    fn each_escrow_entry_is_invoiced_once() {
        let mut invoice = open_invoice();
        let (order_id, sub_id) = sub_ref();

        let cmd = InvoiceCommand::AddLine(AddLine {
            order_id,
            seller_order_id: sub_id,
            amount: 800,
            occurred_at: test_time(),
        });
        let events = invoice.handle(&cmd).unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            invoice.apply(e);
        }
        assert_eq!(invoice.total_commission(), 800);

        let replay = invoice.handle(&cmd).unwrap();
        assert!(replay.is_empty());
        assert_eq!(invoice.lines().len(), 1);
    }

    #[test]
    fn credit_note_reduces_invoiced_commission_with_bounds() {
        let mut invoice = open_invoice();
        let (order_id, sub_id) = sub_ref();

        let events = invoice
            .handle(&InvoiceCommand::AddLine(AddLine {
                order_id,
                seller_order_id: sub_id,
                amount: 800,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }

        let events = invoice
            .handle(&InvoiceCommand::AddCreditNote(AddCreditNote {
                order_id,
                seller_order_id: sub_id,
                amount: 300,
                reason: "partial refund".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            invoice.apply(e);
        }

        assert_eq!(invoice.total_commission(), 500);
        assert_eq!(invoice.invoiced_for(sub_id), 500);
        assert!(invoice.lines()[1].is_credit);
        assert_eq!(invoice.lines()[1].amount, -300);

        // Over-crediting the remaining amount is rejected.
        let err = invoice
            .handle(&InvoiceCommand::AddCreditNote(AddCreditNote {
                order_id,
                seller_order_id: sub_id,
                amount: 501,
                reason: "full refund".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn credit_note_requires_an_invoiced_line() {
        let invoice = open_invoice();
        let (order_id, sub_id) = sub_ref();

        let err = invoice
            .handle(&InvoiceCommand::AddCreditNote(AddCreditNote {
                order_id,
                seller_order_id: sub_id,
                amount: 100,
                reason: "refund".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn finalized_invoices_are_immutable() {
        let mut invoice = open_invoice();
        let (order_id, sub_id) = sub_ref();

        let events = invoice
            .handle(&InvoiceCommand::AddLine(AddLine {
                order_id,
                seller_order_id: sub_id,
                amount: 800,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }

        let events = invoice
            .handle(&InvoiceCommand::Finalize(Finalize {
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }
        assert_eq!(invoice.status(), InvoiceStatus::Finalized);

        let err = invoice
            .handle(&InvoiceCommand::AddLine(AddLine {
                order_id,
                seller_order_id: SellerOrderId::new(AggregateId::new()),
                amount: 100,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let replay = invoice
            .handle(&InvoiceCommand::Finalize(Finalize {
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plaza_core::{Aggregate, AggregateId, AggregateRoot, BuyerId, DomainError};
use plaza_events::Event;
use plaza_orders::OrderId;

use crate::provider::PaymentStatus;

/// Payment selection identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionId(pub AggregateId);

impl SelectionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SelectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// How the buyer chose to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
}

/// Aggregate root: PaymentSelection.
///
/// One per provider reference (uniqueness is enforced by the selection
/// registry in infra). Created when the buyer picks a payment method at
/// checkout; advanced only by payment reconciliation. The duplicate-callback
/// guard is always "does the selection already carry this status *and* an
/// order id" — replay safety is a property of this data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSelection {
    id: SelectionId,
    buyer_id: Option<BuyerId>,
    method: Option<PaymentMethod>,
    provider_reference: Option<String>,
    status: PaymentStatus,
    order_id: Option<OrderId>,
    failure_reason: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PaymentSelection {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SelectionId) -> Self {
        Self {
            id,
            buyer_id: None,
            method: None,
            provider_reference: None,
            status: PaymentStatus::Pending,
            order_id: None,
            failure_reason: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SelectionId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn method(&self) -> Option<PaymentMethod> {
        self.method
    }

    pub fn provider_reference(&self) -> Option<&str> {
        self.provider_reference.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// The duplicate-callback guard for a given mapped status.
    pub fn already_settled_as(&self, status: PaymentStatus) -> bool {
        self.status == status && self.order_id.is_some()
    }
}

impl AggregateRoot for PaymentSelection {
    type Id = SelectionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSelection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSelection {
    pub selection_id: SelectionId,
    pub buyer_id: BuyerId,
    pub method: PaymentMethod,
    pub provider_reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPaid (provider reported a successful payment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPaid {
    pub selection_id: SelectionId,
    pub order_id: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPending (provider still processing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPending {
    pub selection_id: SelectionId,
    pub order_id: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailed {
    pub selection_id: SelectionId,
    pub reason: Option<String>,
    pub order_id: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordRefunded (provider-initiated refund notification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRefunded {
    pub selection_id: SelectionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionCommand {
    CreateSelection(CreateSelection),
    RecordPaid(RecordPaid),
    RecordPending(RecordPending),
    RecordFailed(RecordFailed),
    RecordRefunded(RecordRefunded),
}

/// Event: SelectionCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCreated {
    pub selection_id: SelectionId,
    pub buyer_id: BuyerId,
    pub method: PaymentMethod,
    pub provider_reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SelectionPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPaid {
    pub selection_id: SelectionId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SelectionPending (order linked while payment is still processing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPending {
    pub selection_id: SelectionId,
    pub order_id: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SelectionFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionFailed {
    pub selection_id: SelectionId,
    pub reason: Option<String>,
    pub order_id: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SelectionRefunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRefunded {
    pub selection_id: SelectionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionEvent {
    SelectionCreated(SelectionCreated),
    SelectionPaid(SelectionPaid),
    SelectionPending(SelectionPending),
    SelectionFailed(SelectionFailed),
    SelectionRefunded(SelectionRefunded),
}

impl Event for SelectionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SelectionEvent::SelectionCreated(_) => "payments.selection.created",
            SelectionEvent::SelectionPaid(_) => "payments.selection.paid",
            SelectionEvent::SelectionPending(_) => "payments.selection.pending",
            SelectionEvent::SelectionFailed(_) => "payments.selection.failed",
            SelectionEvent::SelectionRefunded(_) => "payments.selection.refunded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SelectionEvent::SelectionCreated(e) => e.occurred_at,
            SelectionEvent::SelectionPaid(e) => e.occurred_at,
            SelectionEvent::SelectionPending(e) => e.occurred_at,
            SelectionEvent::SelectionFailed(e) => e.occurred_at,
            SelectionEvent::SelectionRefunded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PaymentSelection {
    type Command = SelectionCommand;
    type Event = SelectionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SelectionEvent::SelectionCreated(e) => {
                self.id = e.selection_id;
                self.buyer_id = Some(e.buyer_id);
                self.method = Some(e.method);
                self.provider_reference = Some(e.provider_reference.clone());
                self.status = PaymentStatus::Pending;
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            SelectionEvent::SelectionPaid(e) => {
                self.status = PaymentStatus::Paid;
                self.order_id = Some(e.order_id);
                self.updated_at = Some(e.occurred_at);
            }
            SelectionEvent::SelectionPending(e) => {
                self.status = PaymentStatus::Pending;
                if self.order_id.is_none() {
                    self.order_id = e.order_id;
                }
                self.updated_at = Some(e.occurred_at);
            }
            SelectionEvent::SelectionFailed(e) => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = e.reason.clone();
                if self.order_id.is_none() {
                    self.order_id = e.order_id;
                }
                self.updated_at = Some(e.occurred_at);
            }
            SelectionEvent::SelectionRefunded(e) => {
                self.status = PaymentStatus::Refunded;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SelectionCommand::CreateSelection(cmd) => self.handle_create(cmd),
            SelectionCommand::RecordPaid(cmd) => self.handle_record_paid(cmd),
            SelectionCommand::RecordPending(cmd) => self.handle_record_pending(cmd),
            SelectionCommand::RecordFailed(cmd) => self.handle_record_failed(cmd),
            SelectionCommand::RecordRefunded(cmd) => self.handle_record_refunded(cmd),
        }
    }
}

impl PaymentSelection {
    fn handle_create(&self, cmd: &CreateSelection) -> Result<Vec<SelectionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payment selection already exists"));
        }
        if cmd.provider_reference.trim().is_empty() {
            return Err(DomainError::validation("provider reference is required"));
        }

        Ok(vec![SelectionEvent::SelectionCreated(SelectionCreated {
            selection_id: cmd.selection_id,
            buyer_id: cmd.buyer_id,
            method: cmd.method,
            provider_reference: cmd.provider_reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_paid(&self, cmd: &RecordPaid) -> Result<Vec<SelectionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }

        // Duplicate callback: already Paid with a linked order.
        if self.already_settled_as(PaymentStatus::Paid) {
            return Ok(vec![]);
        }
        // A refund is final; a late success callback cannot resurrect it.
        if self.status == PaymentStatus::Refunded {
            return Ok(vec![]);
        }

        let order_id = cmd
            .order_id
            .or(self.order_id)
            .ok_or_else(|| DomainError::validation("paid selection requires an order link"))?;

        Ok(vec![SelectionEvent::SelectionPaid(SelectionPaid {
            selection_id: cmd.selection_id,
            order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_pending(
        &self,
        cmd: &RecordPending,
    ) -> Result<Vec<SelectionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }

        // Duplicate, or a stale pending arriving after a final status.
        if self.already_settled_as(PaymentStatus::Pending) {
            return Ok(vec![]);
        }
        if matches!(
            self.status,
            PaymentStatus::Paid | PaymentStatus::Refunded | PaymentStatus::Failed
        ) {
            return Ok(vec![]);
        }

        Ok(vec![SelectionEvent::SelectionPending(SelectionPending {
            selection_id: cmd.selection_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_failed(
        &self,
        cmd: &RecordFailed,
    ) -> Result<Vec<SelectionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }

        if self.already_settled_as(PaymentStatus::Failed) {
            return Ok(vec![]);
        }
        // Money that arrived (or was returned) stays recorded as such.
        if matches!(self.status, PaymentStatus::Paid | PaymentStatus::Refunded) {
            return Ok(vec![]);
        }

        Ok(vec![SelectionEvent::SelectionFailed(SelectionFailed {
            selection_id: cmd.selection_id,
            reason: cmd.reason.clone(),
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_refunded(
        &self,
        cmd: &RecordRefunded,
    ) -> Result<Vec<SelectionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }

        if self.status == PaymentStatus::Refunded {
            return Ok(vec![]);
        }

        Ok(vec![SelectionEvent::SelectionRefunded(SelectionRefunded {
            selection_id: cmd.selection_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_selection_id() -> SelectionId {
        SelectionId::new(AggregateId::new())
    }

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_selection() -> PaymentSelection {
        let id = test_selection_id();
        let mut sel = PaymentSelection::empty(id);
        let events = sel
            .handle(&SelectionCommand::CreateSelection(CreateSelection {
                selection_id: id,
                buyer_id: BuyerId::new(),
                method: PaymentMethod::Card,
                provider_reference: "ref-1".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            sel.apply(e);
        }
        sel
    }

    #[test]
    fn creation_starts_pending_and_unlinked() {
        let sel = created_selection();
        assert_eq!(sel.status(), PaymentStatus::Pending);
        assert_eq!(sel.order_id(), None);
        assert_eq!(sel.provider_reference(), Some("ref-1"));
    }

    #[test]
    fn create_requires_a_reference() {
        let id = test_selection_id();
        let sel = PaymentSelection::empty(id);
        let err = sel
            .handle(&SelectionCommand::CreateSelection(CreateSelection {
                selection_id: id,
                buyer_id: BuyerId::new(),
                method: PaymentMethod::Card,
                provider_reference: "  ".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn duplicate_paid_callback_decides_nothing() {
        let mut sel = created_selection();
        let order_id = test_order_id();

        let cmd = SelectionCommand::RecordPaid(RecordPaid {
            selection_id: sel.id_typed(),
            order_id: Some(order_id),
            occurred_at: test_time(),
        });
        let events = sel.handle(&cmd).unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            sel.apply(e);
        }
        assert!(sel.already_settled_as(PaymentStatus::Paid));

        let replay = sel.handle(&cmd).unwrap();
        assert!(replay.is_empty());
        assert_eq!(sel.order_id(), Some(order_id));
    }

    #[test]
    fn paid_without_any_order_link_is_rejected() {
        let sel = created_selection();
        let err = sel
            .handle(&SelectionCommand::RecordPaid(RecordPaid {
                selection_id: sel.id_typed(),
                order_id: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn stale_pending_after_paid_is_ignored() {
        let mut sel = created_selection();
        let order_id = test_order_id();

        let events = sel
            .handle(&SelectionCommand::RecordPaid(RecordPaid {
                selection_id: sel.id_typed(),
                order_id: Some(order_id),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            sel.apply(e);
        }

        let stale = sel
            .handle(&SelectionCommand::RecordPending(RecordPending {
                selection_id: sel.id_typed(),
                order_id: Some(order_id),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(stale.is_empty());
        assert_eq!(sel.status(), PaymentStatus::Paid);
    }

    #[test]
    fn late_failure_does_not_clobber_paid() {
        let mut sel = created_selection();
        let order_id = test_order_id();

        let events = sel
            .handle(&SelectionCommand::RecordPaid(RecordPaid {
                selection_id: sel.id_typed(),
                order_id: Some(order_id),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            sel.apply(e);
        }

        let late = sel
            .handle(&SelectionCommand::RecordFailed(RecordFailed {
                selection_id: sel.id_typed(),
                reason: Some("timeout".to_string()),
                order_id: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(late.is_empty());
        assert_eq!(sel.status(), PaymentStatus::Paid);
    }

    #[test]
    fn failure_records_reason_and_order_link() {
        let mut sel = created_selection();
        let order_id = test_order_id();

        let events = sel
            .handle(&SelectionCommand::RecordFailed(RecordFailed {
                selection_id: sel.id_typed(),
                reason: Some("card declined".to_string()),
                order_id: Some(order_id),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            sel.apply(e);
        }

        assert_eq!(sel.status(), PaymentStatus::Failed);
        assert_eq!(sel.failure_reason(), Some("card declined"));
        assert_eq!(sel.order_id(), Some(order_id));
        assert!(sel.already_settled_as(PaymentStatus::Failed));
    }

    #[test]
    fn refund_is_final() {
        let mut sel = created_selection();
        let order_id = test_order_id();

        for cmd in [
            SelectionCommand::RecordPaid(RecordPaid {
                selection_id: sel.id_typed(),
                order_id: Some(order_id),
                occurred_at: test_time(),
            }),
            SelectionCommand::RecordRefunded(RecordRefunded {
                selection_id: sel.id_typed(),
                occurred_at: test_time(),
            }),
        ] {
            let events = sel.handle(&cmd).unwrap();
            for e in &events {
                sel.apply(e);
            }
        }
        assert_eq!(sel.status(), PaymentStatus::Refunded);

        let replay = sel
            .handle(&SelectionCommand::RecordRefunded(RecordRefunded {
                selection_id: sel.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());

        let late_paid = sel
            .handle(&SelectionCommand::RecordPaid(RecordPaid {
                selection_id: sel.id_typed(),
                order_id: Some(order_id),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(late_paid.is_empty());
        assert_eq!(sel.status(), PaymentStatus::Refunded);
    }
}

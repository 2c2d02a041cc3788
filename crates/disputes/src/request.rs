use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plaza_core::money::Amount;
use plaza_core::{Aggregate, AggregateId, AggregateRoot, BuyerId, DomainError, SellerId};
use plaza_events::Event;
use plaza_orders::{OrderId, SellerOrderId};

/// Return request identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnRequestId(pub AggregateId);

impl ReturnRequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReturnRequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What the buyer opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Return,
    Complaint,
}

/// Workflow status. `Rejected` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Approved,
    PartialProposed,
    InfoRequested,
    Rejected,
    Completed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Completed)
    }

    /// Statuses from which a resolution may complete the request.
    pub fn can_resolve(self) -> bool {
        matches!(
            self,
            RequestStatus::Approved | RequestStatus::PartialProposed | RequestStatus::InfoRequested
        )
    }
}

/// A seller decision on a `Requested` request; maps 1:1 to a target status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerDecision {
    Accept,
    ProposePartial,
    RequestInfo,
    Reject,
}

impl SellerDecision {
    pub fn target_status(self) -> RequestStatus {
        match self {
            SellerDecision::Accept => RequestStatus::Approved,
            SellerDecision::ProposePartial => RequestStatus::PartialProposed,
            SellerDecision::RequestInfo => RequestStatus::InfoRequested,
            SellerDecision::Reject => RequestStatus::Rejected,
        }
    }
}

/// Final disposition of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    FullRefund,
    PartialRefund,
    Replacement,
    Repair,
    NoRefund,
}

impl Resolution {
    pub fn requires_refund_amount(self) -> bool {
        matches!(self, Resolution::FullRefund | Resolution::PartialRefund)
    }
}

/// External refund-transfer state for refund resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
}

/// A party to the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Buyer,
    Seller,
}

impl Party {
    pub fn other(self) -> Party {
        match self {
            Party::Buyer => Party::Seller,
            Party::Seller => Party::Buyer,
        }
    }
}

/// One message in the append-only thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub author: Party,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Aggregate root: ReturnRequest, scoped to one sub-order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    id: ReturnRequestId,
    order_id: Option<OrderId>,
    seller_order_id: Option<SellerOrderId>,
    buyer_id: Option<BuyerId>,
    seller_id: Option<SellerId>,
    kind: RequestKind,
    status: RequestStatus,
    reason: String,
    description: Option<String>,
    resolution: Option<Resolution>,
    refund_amount: Option<Amount>,
    refund_status: Option<RefundStatus>,
    requested_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    messages: Vec<RequestMessage>,
    unread_buyer: u32,
    unread_seller: u32,
    version: u64,
    created: bool,
}

impl ReturnRequest {
    /// Empty aggregate for rehydration.
    pub fn empty(id: ReturnRequestId) -> Self {
        Self {
            id,
            order_id: None,
            seller_order_id: None,
            buyer_id: None,
            seller_id: None,
            kind: RequestKind::Return,
            status: RequestStatus::Requested,
            reason: String::new(),
            description: None,
            resolution: None,
            refund_amount: None,
            refund_status: None,
            requested_at: None,
            updated_at: None,
            messages: Vec::new(),
            unread_buyer: 0,
            unread_seller: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReturnRequestId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn seller_order_id(&self) -> Option<SellerOrderId> {
        self.seller_order_id
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn seller_id(&self) -> Option<SellerId> {
        self.seller_id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn refund_amount(&self) -> Option<Amount> {
        self.refund_amount
    }

    pub fn refund_status(&self) -> Option<RefundStatus> {
        self.refund_status
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn messages(&self) -> &[RequestMessage] {
        &self.messages
    }

    pub fn unread_count(&self, party: Party) -> u32 {
        match party {
            Party::Buyer => self.unread_buyer,
            Party::Seller => self.unread_seller,
        }
    }

    fn ensure_seller_actor(&self, actor: SellerId) -> Result<(), DomainError> {
        if self.seller_id != Some(actor) {
            return Err(DomainError::forbidden());
        }
        Ok(())
    }
}

impl AggregateRoot for ReturnRequest {
    type Id = ReturnRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub request_id: ReturnRequestId,
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub kind: RequestKind,
    pub reason: String,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SellerDecide — only legal while the request is `Requested`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerDecide {
    pub request_id: ReturnRequestId,
    pub actor: SellerId,
    pub decision: SellerDecision,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Resolve — drives the request to `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolve {
    pub request_id: ReturnRequestId,
    pub actor: SellerId,
    pub resolution: Resolution,
    pub refund_amount: Option<Amount>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmRefund — the external refund transfer completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRefund {
    pub request_id: ReturnRequestId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostMessage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMessage {
    pub request_id: ReturnRequestId,
    pub author: Party,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkRead — the owning party viewed the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRead {
    pub request_id: ReturnRequestId,
    pub party: Party,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnRequestCommand {
    OpenRequest(OpenRequest),
    SellerDecide(SellerDecide),
    Resolve(Resolve),
    ConfirmRefund(ConfirmRefund),
    PostMessage(PostMessage),
    MarkRead(MarkRead),
}

/// Event: RequestOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOpened {
    pub request_id: ReturnRequestId,
    pub order_id: OrderId,
    pub seller_order_id: SellerOrderId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub kind: RequestKind,
    pub reason: String,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SellerDecided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerDecided {
    pub request_id: ReturnRequestId,
    pub decision: SellerDecision,
    pub status: RequestStatus,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestResolved {
    pub request_id: ReturnRequestId,
    pub resolution: Resolution,
    pub refund_amount: Option<Amount>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundConfirmed {
    pub request_id: ReturnRequestId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MessagePosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePosted {
    pub request_id: ReturnRequestId,
    pub author: Party,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ThreadRead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRead {
    pub request_id: ReturnRequestId,
    pub party: Party,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnRequestEvent {
    RequestOpened(RequestOpened),
    SellerDecided(SellerDecided),
    RequestResolved(RequestResolved),
    RefundConfirmed(RefundConfirmed),
    MessagePosted(MessagePosted),
    ThreadRead(ThreadRead),
}

impl Event for ReturnRequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReturnRequestEvent::RequestOpened(_) => "disputes.request.opened",
            ReturnRequestEvent::SellerDecided(_) => "disputes.request.seller_decided",
            ReturnRequestEvent::RequestResolved(_) => "disputes.request.resolved",
            ReturnRequestEvent::RefundConfirmed(_) => "disputes.request.refund_confirmed",
            ReturnRequestEvent::MessagePosted(_) => "disputes.request.message_posted",
            ReturnRequestEvent::ThreadRead(_) => "disputes.request.thread_read",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReturnRequestEvent::RequestOpened(e) => e.occurred_at,
            ReturnRequestEvent::SellerDecided(e) => e.occurred_at,
            ReturnRequestEvent::RequestResolved(e) => e.occurred_at,
            ReturnRequestEvent::RefundConfirmed(e) => e.occurred_at,
            ReturnRequestEvent::MessagePosted(e) => e.occurred_at,
            ReturnRequestEvent::ThreadRead(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ReturnRequest {
    type Command = ReturnRequestCommand;
    type Event = ReturnRequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReturnRequestEvent::RequestOpened(e) => {
                self.id = e.request_id;
                self.order_id = Some(e.order_id);
                self.seller_order_id = Some(e.seller_order_id);
                self.buyer_id = Some(e.buyer_id);
                self.seller_id = Some(e.seller_id);
                self.kind = e.kind;
                self.status = RequestStatus::Requested;
                self.reason = e.reason.clone();
                self.description = e.description.clone();
                self.requested_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            ReturnRequestEvent::SellerDecided(e) => {
                self.status = e.status;
                self.updated_at = Some(e.occurred_at);
            }
            ReturnRequestEvent::RequestResolved(e) => {
                self.status = RequestStatus::Completed;
                self.resolution = Some(e.resolution);
                self.refund_amount = e.refund_amount;
                self.refund_status = if e.resolution.requires_refund_amount() {
                    Some(RefundStatus::Pending)
                } else {
                    None
                };
                self.updated_at = Some(e.occurred_at);
            }
            ReturnRequestEvent::RefundConfirmed(e) => {
                self.refund_status = Some(RefundStatus::Completed);
                self.updated_at = Some(e.occurred_at);
            }
            ReturnRequestEvent::MessagePosted(e) => {
                self.messages.push(RequestMessage {
                    author: e.author,
                    body: e.body.clone(),
                    sent_at: e.occurred_at,
                });
                match e.author.other() {
                    Party::Buyer => self.unread_buyer += 1,
                    Party::Seller => self.unread_seller += 1,
                }
                self.updated_at = Some(e.occurred_at);
            }
            ReturnRequestEvent::ThreadRead(e) => {
                match e.party {
                    Party::Buyer => self.unread_buyer = 0,
                    Party::Seller => self.unread_seller = 0,
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReturnRequestCommand::OpenRequest(cmd) => self.handle_open(cmd),
            ReturnRequestCommand::SellerDecide(cmd) => self.handle_decide(cmd),
            ReturnRequestCommand::Resolve(cmd) => self.handle_resolve(cmd),
            ReturnRequestCommand::ConfirmRefund(cmd) => self.handle_confirm_refund(cmd),
            ReturnRequestCommand::PostMessage(cmd) => self.handle_post_message(cmd),
            ReturnRequestCommand::MarkRead(cmd) => self.handle_mark_read(cmd),
        }
    }
}

impl ReturnRequest {
    fn handle_open(&self, cmd: &OpenRequest) -> Result<Vec<ReturnRequestEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("return request already exists"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a reason is required"));
        }

        Ok(vec![ReturnRequestEvent::RequestOpened(RequestOpened {
            request_id: cmd.request_id,
            order_id: cmd.order_id,
            seller_order_id: cmd.seller_order_id,
            buyer_id: cmd.buyer_id,
            seller_id: cmd.seller_id,
            kind: cmd.kind,
            reason: cmd.reason.clone(),
            description: cmd.description.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decide(&self, cmd: &SellerDecide) -> Result<Vec<ReturnRequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_seller_actor(cmd.actor)?;

        if self.status != RequestStatus::Requested {
            return Err(DomainError::invalid_transition(format!(
                "a seller decision is only legal while the request is requested (currently {:?})",
                self.status
            )));
        }

        Ok(vec![ReturnRequestEvent::SellerDecided(SellerDecided {
            request_id: cmd.request_id,
            decision: cmd.decision,
            status: cmd.decision.target_status(),
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve(&self, cmd: &Resolve) -> Result<Vec<ReturnRequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_seller_actor(cmd.actor)?;

        if !self.status.can_resolve() {
            return Err(DomainError::invalid_transition(format!(
                "request cannot be resolved from {:?}",
                self.status
            )));
        }

        let refund_amount = if cmd.resolution.requires_refund_amount() {
            match cmd.refund_amount {
                Some(amount) if amount > 0 => Some(amount),
                _ => {
                    return Err(DomainError::validation(
                        "refund resolutions require a positive refund amount",
                    ));
                }
            }
        } else {
            if cmd.refund_amount.is_some() {
                return Err(DomainError::validation(
                    "only refund resolutions carry a refund amount",
                ));
            }
            None
        };

        Ok(vec![ReturnRequestEvent::RequestResolved(RequestResolved {
            request_id: cmd.request_id,
            resolution: cmd.resolution,
            refund_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_refund(
        &self,
        cmd: &ConfirmRefund,
    ) -> Result<Vec<ReturnRequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        match self.refund_status {
            Some(RefundStatus::Completed) => Ok(vec![]),
            Some(RefundStatus::Pending) => {
                Ok(vec![ReturnRequestEvent::RefundConfirmed(RefundConfirmed {
                    request_id: cmd.request_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            None => Err(DomainError::invariant(
                "request has no pending refund to confirm",
            )),
        }
    }

    fn handle_post_message(
        &self,
        cmd: &PostMessage,
    ) -> Result<Vec<ReturnRequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if cmd.body.trim().is_empty() {
            return Err(DomainError::validation("message body is empty"));
        }

        Ok(vec![ReturnRequestEvent::MessagePosted(MessagePosted {
            request_id: cmd.request_id,
            author: cmd.author,
            body: cmd.body.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_read(&self, cmd: &MarkRead) -> Result<Vec<ReturnRequestEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.unread_count(cmd.party) == 0 {
            return Ok(vec![]);
        }

        Ok(vec![ReturnRequestEvent::ThreadRead(ThreadRead {
            request_id: cmd.request_id,
            party: cmd.party,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn opened_request() -> (ReturnRequest, SellerId) {
        let request_id = ReturnRequestId::new(AggregateId::new());
        let seller_id = SellerId::new();
        let mut request = ReturnRequest::empty(request_id);
        let events = request
            .handle(&ReturnRequestCommand::OpenRequest(OpenRequest {
                request_id,
                order_id: OrderId::new(AggregateId::new()),
                seller_order_id: SellerOrderId::new(AggregateId::new()),
                buyer_id: BuyerId::new(),
                seller_id,
                kind: RequestKind::Return,
                reason: "damaged on arrival".to_string(),
                description: Some("the box was crushed".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            request.apply(e);
        }
        (request, seller_id)
    }

    fn decide(request: &mut ReturnRequest, seller: SellerId, decision: SellerDecision) {
        let request_id = request.id_typed();
        plaza_events::execute(
            request,
            &ReturnRequestCommand::SellerDecide(SellerDecide {
                request_id,
                actor: seller,
                decision,
                note: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn open_starts_requested() {
        let (request, _) = opened_request();
        assert_eq!(request.status(), RequestStatus::Requested);
        assert_eq!(request.kind(), RequestKind::Return);
        assert!(request.requested_at().is_some());
    }

    #[test]
    fn decisions_map_to_their_target_status() {
        for (decision, expected) in [
            (SellerDecision::Accept, RequestStatus::Approved),
            (SellerDecision::ProposePartial, RequestStatus::PartialProposed),
            (SellerDecision::RequestInfo, RequestStatus::InfoRequested),
            (SellerDecision::Reject, RequestStatus::Rejected),
        ] {
            let (mut request, seller) = opened_request();
            decide(&mut request, seller, decision);
            assert_eq!(request.status(), expected);
        }
    }

    #[test]
    fn decision_is_only_legal_while_requested() {
        let (mut request, seller) = opened_request();
        decide(&mut request, seller, SellerDecision::Accept);

        let err = request
            .handle(&ReturnRequestCommand::SellerDecide(SellerDecide {
                request_id: request.id_typed(),
                actor: seller,
                decision: SellerDecision::Reject,
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
        assert_eq!(request.status(), RequestStatus::Approved);
    }

    #[test]
    fn foreign_seller_is_forbidden() {
        let (request, _) = opened_request();
        let err = request
            .handle(&ReturnRequestCommand::SellerDecide(SellerDecide {
                request_id: request.id_typed(),
                actor: SellerId::new(),
                decision: SellerDecision::Accept,
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::Forbidden);
    }

    #[test]
    fn refund_resolution_completes_with_pending_refund() {
        let (mut request, seller) = opened_request();
        decide(&mut request, seller, SellerDecision::Accept);

        let events = request
            .handle(&ReturnRequestCommand::Resolve(Resolve {
                request_id: request.id_typed(),
                actor: seller,
                resolution: Resolution::FullRefund,
                refund_amount: Some(4_000),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            request.apply(e);
        }

        assert_eq!(request.status(), RequestStatus::Completed);
        assert_eq!(request.resolution(), Some(Resolution::FullRefund));
        assert_eq!(request.refund_amount(), Some(4_000));
        assert_eq!(request.refund_status(), Some(RefundStatus::Pending));
    }

    #[test]
    fn refund_resolution_requires_an_amount() {
        let (mut request, seller) = opened_request();
        decide(&mut request, seller, SellerDecision::Accept);

        let err = request
            .handle(&ReturnRequestCommand::Resolve(Resolve {
                request_id: request.id_typed(),
                actor: seller,
                resolution: Resolution::PartialRefund,
                refund_amount: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn non_refund_resolution_rejects_an_amount() {
        let (mut request, seller) = opened_request();
        decide(&mut request, seller, SellerDecision::Accept);

        let err = request
            .handle(&ReturnRequestCommand::Resolve(Resolve {
                request_id: request.id_typed(),
                actor: seller,
                resolution: Resolution::Replacement,
                refund_amount: Some(100),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn resolution_is_not_legal_from_requested_or_terminal() {
        let (request, seller) = opened_request();
        let err = request
            .handle(&ReturnRequestCommand::Resolve(Resolve {
                request_id: request.id_typed(),
                actor: seller,
                resolution: Resolution::NoRefund,
                refund_amount: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let (mut rejected, seller) = opened_request();
        decide(&mut rejected, seller, SellerDecision::Reject);
        let err = rejected
            .handle(&ReturnRequestCommand::Resolve(Resolve {
                request_id: rejected.id_typed(),
                actor: seller,
                resolution: Resolution::NoRefund,
                refund_amount: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn refund_confirmation_is_idempotent() {
        let (mut request, seller) = opened_request();
        decide(&mut request, seller, SellerDecision::Accept);
        for cmd in [
            ReturnRequestCommand::Resolve(Resolve {
                request_id: request.id_typed(),
                actor: seller,
                resolution: Resolution::PartialRefund,
                refund_amount: Some(1_500),
                occurred_at: test_time(),
            }),
            ReturnRequestCommand::ConfirmRefund(ConfirmRefund {
                request_id: request.id_typed(),
                occurred_at: test_time(),
            }),
        ] {
            let events = request.handle(&cmd).unwrap();
            for e in &events {
                request.apply(e);
            }
        }
        assert_eq!(request.refund_status(), Some(RefundStatus::Completed));

        let replay = request
            .handle(&ReturnRequestCommand::ConfirmRefund(ConfirmRefund {
                request_id: request.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }

    #[test]
    fn messages_bump_the_other_partys_unread_counter() {
        let (mut request, _) = opened_request();

        for (author, body) in [
            (Party::Buyer, "the lamp arrived broken"),
            (Party::Seller, "could you send a photo?"),
            (Party::Buyer, "attached"),
        ] {
            let events = request
                .handle(&ReturnRequestCommand::PostMessage(PostMessage {
                    request_id: request.id_typed(),
                    author,
                    body: body.to_string(),
                    occurred_at: test_time(),
                }))
                .unwrap();
            for e in &events {
                request.apply(e);
            }
        }

        assert_eq!(request.messages().len(), 3);
        assert_eq!(request.unread_count(Party::Seller), 2);
        assert_eq!(request.unread_count(Party::Buyer), 1);

        let events = request
            .handle(&ReturnRequestCommand::MarkRead(MarkRead {
                request_id: request.id_typed(),
                party: Party::Seller,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            request.apply(e);
        }
        assert_eq!(request.unread_count(Party::Seller), 0);
        assert_eq!(request.unread_count(Party::Buyer), 1);

        // Nothing unread: mark-read decides nothing.
        let replay = request
            .handle(&ReturnRequestCommand::MarkRead(MarkRead {
                request_id: request.id_typed(),
                party: Party::Seller,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }
}

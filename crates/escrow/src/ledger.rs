use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plaza_core::money::Amount;
use plaza_core::{Aggregate, AggregateId, AggregateRoot, BuyerId, DomainError, Entity, SellerId};
use plaza_events::Event;
use plaza_orders::{OrderId, SellerOrderId};

/// Namespace for deriving an escrow account id from its order id.
///
/// The derivation is deterministic so every reconciliation replay addresses
/// the same account stream instead of opening a second one.
pub const ESCROW_NAMESPACE: Uuid = Uuid::from_u128(0x7c1a_4f0e_9b2d_4c53_8e6f_a1b2c3d4e5f6);

/// Where the held funds currently sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    ReleasedToBuyer,
    ReleasedToSeller,
}

/// Link from an escrow entry to the payout schedule item that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLink {
    pub schedule_id: AggregateId,
    pub item_id: Uuid,
}

/// Creation spec for one ledger entry (one per sub-order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldSpec {
    pub seller_order_id: SellerOrderId,
    pub seller_id: SellerId,
    pub held_amount: Amount,
    pub commission_amount: Amount,
}

/// One ledger entry: funds held for one sub-order.
///
/// Invariant at every point: `held = commission + seller_payout`.
/// Immutable once released (either direction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowEntry {
    seller_order_id: SellerOrderId,
    seller_id: SellerId,
    held_amount: Amount,
    commission_amount: Amount,
    seller_payout_amount: Amount,
    status: EscrowStatus,
    created_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    payout_eligible_at: Option<DateTime<Utc>>,
    schedule_link: Option<ScheduleLink>,
    refund_refs: Vec<Uuid>,
}

impl Entity for EscrowEntry {
    type Id = SellerOrderId;

    fn id(&self) -> &Self::Id {
        &self.seller_order_id
    }
}

impl EscrowEntry {
    pub fn seller_order_id(&self) -> SellerOrderId {
        self.seller_order_id
    }

    pub fn seller_id(&self) -> SellerId {
        self.seller_id
    }

    pub fn held_amount(&self) -> Amount {
        self.held_amount
    }

    pub fn commission_amount(&self) -> Amount {
        self.commission_amount
    }

    pub fn seller_payout_amount(&self) -> Amount {
        self.seller_payout_amount
    }

    pub fn status(&self) -> EscrowStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.released_at
    }

    pub fn payout_eligible_at(&self) -> Option<DateTime<Utc>> {
        self.payout_eligible_at
    }

    pub fn schedule_link(&self) -> Option<ScheduleLink> {
        self.schedule_link
    }

    /// The ledger balance invariant.
    pub fn balanced(&self) -> bool {
        self.held_amount == self.commission_amount + self.seller_payout_amount
    }
}

/// Aggregate root: escrow account (one per order, one entry per sub-order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowAccount {
    id: AggregateId,
    order_id: Option<OrderId>,
    buyer_id: Option<BuyerId>,
    entries: Vec<EscrowEntry>,
    version: u64,
    created: bool,
}

impl EscrowAccount {
    /// Empty aggregate for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            order_id: None,
            buyer_id: None,
            entries: Vec::new(),
            version: 0,
            created: false,
        }
    }

    /// Deterministic account id for an order.
    pub fn account_id_for(order_id: OrderId) -> AggregateId {
        AggregateId::derived(&ESCROW_NAMESPACE, order_id.to_string().as_bytes())
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn entries(&self) -> &[EscrowEntry] {
        &self.entries
    }

    pub fn entry(&self, seller_order_id: SellerOrderId) -> Option<&EscrowEntry> {
        self.entries
            .iter()
            .find(|e| e.seller_order_id == seller_order_id)
    }

    fn entry_required(&self, seller_order_id: SellerOrderId) -> Result<&EscrowEntry, DomainError> {
        self.entry(seller_order_id).ok_or(DomainError::NotFound)
    }
}

impl AggregateRoot for EscrowAccount {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: HoldFunds — create all entries for an order, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldFunds {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub entries: Vec<HoldSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeEligibility — stamp the payout-eligibility date
/// (delivery anchor + hold period, resolved by the caller's policy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeEligibility {
    pub seller_order_id: SellerOrderId,
    pub eligible_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyEscrowRefund — return held funds to the buyer.
///
/// `refund_ref` is the refund's natural key (the resolved return request);
/// a ref the entry already carries decides nothing on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyEscrowRefund {
    pub seller_order_id: SellerOrderId,
    pub amount: Amount,
    pub refund_ref: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkScheduled — link an entry to its payout schedule item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkScheduled {
    pub seller_order_id: SellerOrderId,
    pub schedule_id: AggregateId,
    pub item_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseToSeller — the payout for this entry was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseToSeller {
    pub seller_order_id: SellerOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowCommand {
    HoldFunds(HoldFunds),
    FinalizeEligibility(FinalizeEligibility),
    ApplyEscrowRefund(ApplyEscrowRefund),
    MarkScheduled(MarkScheduled),
    ReleaseToSeller(ReleaseToSeller),
}

/// Event: FundsHeld.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsHeld {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub entries: Vec<HoldSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EligibilityFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityFinalized {
    pub seller_order_id: SellerOrderId,
    pub eligible_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EscrowRefundApplied.
///
/// The refund consumes the seller-payout share first; only once that is
/// exhausted does it cut into commission (`commission_reduction` is what the
/// invoicing run turns into a credit note).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRefundApplied {
    pub seller_order_id: SellerOrderId,
    pub amount: Amount,
    pub payout_reduction: Amount,
    pub commission_reduction: Amount,
    pub released_to_buyer: bool,
    pub refund_ref: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EntryScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryScheduled {
    pub seller_order_id: SellerOrderId,
    pub schedule_id: AggregateId,
    pub item_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EntryReleasedToSeller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReleasedToSeller {
    pub seller_order_id: SellerOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEvent {
    FundsHeld(FundsHeld),
    EligibilityFinalized(EligibilityFinalized),
    EscrowRefundApplied(EscrowRefundApplied),
    EntryScheduled(EntryScheduled),
    EntryReleasedToSeller(EntryReleasedToSeller),
}

impl Event for EscrowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EscrowEvent::FundsHeld(_) => "escrow.account.funds_held",
            EscrowEvent::EligibilityFinalized(_) => "escrow.entry.eligibility_finalized",
            EscrowEvent::EscrowRefundApplied(_) => "escrow.entry.refund_applied",
            EscrowEvent::EntryScheduled(_) => "escrow.entry.scheduled",
            EscrowEvent::EntryReleasedToSeller(_) => "escrow.entry.released_to_seller",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EscrowEvent::FundsHeld(e) => e.occurred_at,
            EscrowEvent::EligibilityFinalized(e) => e.occurred_at,
            EscrowEvent::EscrowRefundApplied(e) => e.occurred_at,
            EscrowEvent::EntryScheduled(e) => e.occurred_at,
            EscrowEvent::EntryReleasedToSeller(e) => e.occurred_at,
        }
    }
}

impl Aggregate for EscrowAccount {
    type Command = EscrowCommand;
    type Event = EscrowEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EscrowEvent::FundsHeld(e) => {
                self.order_id = Some(e.order_id);
                self.buyer_id = Some(e.buyer_id);
                self.entries = e
                    .entries
                    .iter()
                    .map(|spec| EscrowEntry {
                        seller_order_id: spec.seller_order_id,
                        seller_id: spec.seller_id,
                        held_amount: spec.held_amount,
                        commission_amount: spec.commission_amount,
                        seller_payout_amount: spec.held_amount - spec.commission_amount,
                        status: EscrowStatus::Held,
                        created_at: e.occurred_at,
                        released_at: None,
                        payout_eligible_at: None,
                        schedule_link: None,
                        refund_refs: Vec::new(),
                    })
                    .collect();
                self.created = true;
            }
            EscrowEvent::EligibilityFinalized(e) => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|en| en.seller_order_id == e.seller_order_id)
                {
                    entry.payout_eligible_at = Some(e.eligible_at);
                }
            }
            EscrowEvent::EscrowRefundApplied(e) => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|en| en.seller_order_id == e.seller_order_id)
                {
                    entry.held_amount -= e.amount;
                    entry.seller_payout_amount -= e.payout_reduction;
                    entry.commission_amount -= e.commission_reduction;
                    if let Some(refund_ref) = e.refund_ref {
                        entry.refund_refs.push(refund_ref);
                    }
                    if e.released_to_buyer {
                        entry.status = EscrowStatus::ReleasedToBuyer;
                        entry.released_at = Some(e.occurred_at);
                    }
                }
            }
            EscrowEvent::EntryScheduled(e) => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|en| en.seller_order_id == e.seller_order_id)
                {
                    entry.schedule_link = Some(ScheduleLink {
                        schedule_id: e.schedule_id,
                        item_id: e.item_id,
                    });
                }
            }
            EscrowEvent::EntryReleasedToSeller(e) => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|en| en.seller_order_id == e.seller_order_id)
                {
                    entry.status = EscrowStatus::ReleasedToSeller;
                    entry.released_at = Some(e.occurred_at);
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EscrowCommand::HoldFunds(cmd) => self.handle_hold(cmd),
            EscrowCommand::FinalizeEligibility(cmd) => self.handle_finalize_eligibility(cmd),
            EscrowCommand::ApplyEscrowRefund(cmd) => self.handle_refund(cmd),
            EscrowCommand::MarkScheduled(cmd) => self.handle_mark_scheduled(cmd),
            EscrowCommand::ReleaseToSeller(cmd) => self.handle_release(cmd),
        }
    }
}

impl EscrowAccount {
    fn handle_hold(&self, cmd: &HoldFunds) -> Result<Vec<EscrowEvent>, DomainError> {
        // Entries already exist for this order: replay-safe no-op.
        if self.created {
            return Ok(vec![]);
        }

        if cmd.entries.is_empty() {
            return Err(DomainError::validation("escrow hold requires entries"));
        }

        for (idx, spec) in cmd.entries.iter().enumerate() {
            if spec.held_amount == 0 {
                return Err(DomainError::validation("held amount must be positive"));
            }
            if spec.commission_amount > spec.held_amount {
                return Err(DomainError::invariant(
                    "commission cannot exceed the held amount",
                ));
            }
            if cmd.entries[..idx]
                .iter()
                .any(|other| other.seller_order_id == spec.seller_order_id)
            {
                return Err(DomainError::invariant(
                    "duplicate sub-order in escrow hold",
                ));
            }
        }

        Ok(vec![EscrowEvent::FundsHeld(FundsHeld {
            order_id: cmd.order_id,
            buyer_id: cmd.buyer_id,
            entries: cmd.entries.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize_eligibility(
        &self,
        cmd: &FinalizeEligibility,
    ) -> Result<Vec<EscrowEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        let entry = self.entry_required(cmd.seller_order_id)?;

        if entry.payout_eligible_at.is_some() {
            return Ok(vec![]);
        }
        if entry.status != EscrowStatus::Held {
            return Err(DomainError::invariant(
                "released escrow entries are immutable",
            ));
        }

        Ok(vec![EscrowEvent::EligibilityFinalized(
            EligibilityFinalized {
                seller_order_id: cmd.seller_order_id,
                eligible_at: cmd.eligible_at,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_refund(&self, cmd: &ApplyEscrowRefund) -> Result<Vec<EscrowEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        let entry = self.entry_required(cmd.seller_order_id)?;

        // This refund was already applied: replay-safe no-op.
        if let Some(refund_ref) = cmd.refund_ref {
            if entry.refund_refs.contains(&refund_ref) {
                return Ok(vec![]);
            }
        }

        if cmd.amount == 0 {
            return Err(DomainError::validation("refund amount must be positive"));
        }
        if entry.status != EscrowStatus::Held {
            return Err(DomainError::invariant(
                "released escrow entries are immutable",
            ));
        }
        if cmd.amount > entry.held_amount {
            return Err(DomainError::invariant(
                "refund exceeds the entry's held funds",
            ));
        }

        let payout_reduction = cmd.amount.min(entry.seller_payout_amount);
        let commission_reduction = cmd.amount - payout_reduction;
        let released_to_buyer = cmd.amount == entry.held_amount;

        Ok(vec![EscrowEvent::EscrowRefundApplied(EscrowRefundApplied {
            seller_order_id: cmd.seller_order_id,
            amount: cmd.amount,
            payout_reduction,
            commission_reduction,
            released_to_buyer,
            refund_ref: cmd.refund_ref,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_scheduled(
        &self,
        cmd: &MarkScheduled,
    ) -> Result<Vec<EscrowEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        let entry = self.entry_required(cmd.seller_order_id)?;

        if let Some(link) = entry.schedule_link {
            // Same schedule item re-asserting itself is a replay; anything
            // else would put the entry in two payout batches.
            if link.schedule_id == cmd.schedule_id && link.item_id == cmd.item_id {
                return Ok(vec![]);
            }
            return Err(DomainError::conflict(
                "escrow entry already belongs to a payout schedule item",
            ));
        }
        if entry.status != EscrowStatus::Held {
            return Err(DomainError::invariant(
                "only held entries can be scheduled for payout",
            ));
        }
        if entry.payout_eligible_at.is_none() {
            return Err(DomainError::invariant(
                "entry has no payout eligibility date yet",
            ));
        }

        Ok(vec![EscrowEvent::EntryScheduled(EntryScheduled {
            seller_order_id: cmd.seller_order_id,
            schedule_id: cmd.schedule_id,
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseToSeller) -> Result<Vec<EscrowEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        let entry = self.entry_required(cmd.seller_order_id)?;

        match entry.status {
            EscrowStatus::ReleasedToSeller => Ok(vec![]),
            EscrowStatus::ReleasedToBuyer => Err(DomainError::invariant(
                "entry was refunded to the buyer and cannot be released to the seller",
            )),
            EscrowStatus::Held => {
                if entry.schedule_link.is_none() {
                    return Err(DomainError::invariant(
                        "entry must be scheduled before release",
                    ));
                }
                Ok(vec![EscrowEvent::EntryReleasedToSeller(
                    EntryReleasedToSeller {
                        seller_order_id: cmd.seller_order_id,
                        occurred_at: cmd.occurred_at,
                    },
                )])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_sub_id() -> SellerOrderId {
        SellerOrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn hold_cmd(order_id: OrderId, specs: Vec<HoldSpec>) -> EscrowCommand {
        EscrowCommand::HoldFunds(HoldFunds {
            order_id,
            buyer_id: BuyerId::new(),
            entries: specs,
            occurred_at: test_time(),
        })
    }

    fn spec(sub: SellerOrderId, held: Amount, commission: Amount) -> HoldSpec {
        HoldSpec {
            seller_order_id: sub,
            seller_id: SellerId::new(),
            held_amount: held,
            commission_amount: commission,
        }
    }

    fn held_account(specs: Vec<HoldSpec>) -> EscrowAccount {
        let order_id = test_order_id();
        let account_id = EscrowAccount::account_id_for(order_id);
        let mut account = EscrowAccount::empty(account_id);
        let events = account.handle(&hold_cmd(order_id, specs)).unwrap();
        for e in &events {
            account.apply(e);
        }
        account
    }

    #[test]
    fn account_id_derivation_is_deterministic() {
        let order_id = test_order_id();
        assert_eq!(
            EscrowAccount::account_id_for(order_id),
            EscrowAccount::account_id_for(order_id)
        );
        assert_ne!(
            EscrowAccount::account_id_for(order_id),
            EscrowAccount::account_id_for(test_order_id())
        );
    }

    #[test]
    fn hold_creates_balanced_entries_once() {
        let (a, b) = (test_sub_id(), test_sub_id());
        let account = held_account(vec![spec(a, 8_000, 800), spec(b, 4_000, 400)]);

        assert_eq!(account.entries().len(), 2);
        let entry_a = account.entry(a).unwrap();
        assert_eq!(entry_a.held_amount(), 8_000);
        assert_eq!(entry_a.commission_amount(), 800);
        assert_eq!(entry_a.seller_payout_amount(), 7_200);
        assert!(entry_a.balanced());
        let entry_b = account.entry(b).unwrap();
        assert_eq!(entry_b.seller_payout_amount(), 3_600);
        assert!(entry_b.balanced());

        // Replay: entries already exist, nothing decided.
        let replay = account
            .handle(&hold_cmd(
                account.order_id().unwrap(),
                vec![spec(a, 8_000, 800)],
            ))
            .unwrap();
        assert!(replay.is_empty());
        assert_eq!(account.entries().len(), 2);
    }

    #[test]
    fn commission_above_held_is_rejected() {
        let order_id = test_order_id();
        let account = EscrowAccount::empty(EscrowAccount::account_id_for(order_id));
        let err = account
            .handle(&hold_cmd(order_id, vec![spec(test_sub_id(), 100, 200)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn refund_consumes_payout_before_commission() {
        let sub = test_sub_id();
        let mut account = held_account(vec![spec(sub, 4_000, 400)]);

        let events = account
            .handle(&EscrowCommand::ApplyEscrowRefund(ApplyEscrowRefund {
                seller_order_id: sub,
                amount: 3_700,
                refund_ref: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        match &events[0] {
            EscrowEvent::EscrowRefundApplied(e) => {
                assert_eq!(e.payout_reduction, 3_600);
                assert_eq!(e.commission_reduction, 100);
                assert!(!e.released_to_buyer);
            }
            other => panic!("expected EscrowRefundApplied, got {other:?}"),
        }
        for e in &events {
            account.apply(e);
        }

        let entry = account.entry(sub).unwrap();
        assert_eq!(entry.held_amount(), 300);
        assert_eq!(entry.seller_payout_amount(), 0);
        assert_eq!(entry.commission_amount(), 300);
        assert!(entry.balanced());
    }

    #[test]
    fn full_refund_releases_to_buyer_and_freezes_the_entry() {
        let sub = test_sub_id();
        let mut account = held_account(vec![spec(sub, 4_000, 400)]);

        let events = account
            .handle(&EscrowCommand::ApplyEscrowRefund(ApplyEscrowRefund {
                seller_order_id: sub,
                amount: 4_000,
                refund_ref: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            account.apply(e);
        }

        let entry = account.entry(sub).unwrap();
        assert_eq!(entry.held_amount(), 0);
        assert_eq!(entry.status(), EscrowStatus::ReleasedToBuyer);
        assert!(entry.released_at().is_some());
        assert!(entry.balanced());

        // Immutable once released.
        let err = account
            .handle(&EscrowCommand::ApplyEscrowRefund(ApplyEscrowRefund {
                seller_order_id: sub,
                amount: 1,
                refund_ref: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn refund_ref_already_applied_decides_nothing() {
        let sub = test_sub_id();
        let mut account = held_account(vec![spec(sub, 4_000, 400)]);
        let refund_ref = Some(Uuid::now_v7());

        let cmd = EscrowCommand::ApplyEscrowRefund(ApplyEscrowRefund {
            seller_order_id: sub,
            amount: 1_000,
            refund_ref,
            occurred_at: test_time(),
        });
        let events = account.handle(&cmd).unwrap();
        for e in &events {
            account.apply(e);
        }
        assert_eq!(account.entry(sub).unwrap().held_amount(), 3_000);

        let replay = account.handle(&cmd).unwrap();
        assert!(replay.is_empty());
        assert_eq!(account.entry(sub).unwrap().held_amount(), 3_000);
    }

    #[test]
    fn refund_above_held_funds_is_rejected() {
        let sub = test_sub_id();
        let account = held_account(vec![spec(sub, 4_000, 400)]);

        let err = account
            .handle(&EscrowCommand::ApplyEscrowRefund(ApplyEscrowRefund {
                seller_order_id: sub,
                amount: 4_001,
                refund_ref: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn entry_joins_at_most_one_schedule_item() {
        let sub = test_sub_id();
        let mut account = held_account(vec![spec(sub, 4_000, 400)]);

        let events = account
            .handle(&EscrowCommand::FinalizeEligibility(FinalizeEligibility {
                seller_order_id: sub,
                eligible_at: test_time(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            account.apply(e);
        }

        let schedule_id = AggregateId::new();
        let item_id = Uuid::now_v7();
        let cmd = EscrowCommand::MarkScheduled(MarkScheduled {
            seller_order_id: sub,
            schedule_id,
            item_id,
            occurred_at: test_time(),
        });
        let events = account.handle(&cmd).unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            account.apply(e);
        }

        // Same link replayed: no-op.
        assert!(account.handle(&cmd).unwrap().is_empty());

        // A different schedule item: conflict.
        let err = account
            .handle(&EscrowCommand::MarkScheduled(MarkScheduled {
                seller_order_id: sub,
                schedule_id: AggregateId::new(),
                item_id: Uuid::now_v7(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn scheduling_requires_eligibility() {
        let sub = test_sub_id();
        let account = held_account(vec![spec(sub, 4_000, 400)]);

        let err = account
            .handle(&EscrowCommand::MarkScheduled(MarkScheduled {
                seller_order_id: sub,
                schedule_id: AggregateId::new(),
                item_id: Uuid::now_v7(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn release_requires_schedule_and_is_idempotent() {
        let sub = test_sub_id();
        let mut account = held_account(vec![spec(sub, 4_000, 400)]);

        let err = account
            .handle(&EscrowCommand::ReleaseToSeller(ReleaseToSeller {
                seller_order_id: sub,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        for cmd in [
            EscrowCommand::FinalizeEligibility(FinalizeEligibility {
                seller_order_id: sub,
                eligible_at: test_time(),
                occurred_at: test_time(),
            }),
            EscrowCommand::MarkScheduled(MarkScheduled {
                seller_order_id: sub,
                schedule_id: AggregateId::new(),
                item_id: Uuid::now_v7(),
                occurred_at: test_time(),
            }),
            EscrowCommand::ReleaseToSeller(ReleaseToSeller {
                seller_order_id: sub,
                occurred_at: test_time(),
            }),
        ] {
            let events = account.handle(&cmd).unwrap();
            for e in &events {
                account.apply(e);
            }
        }

        let entry = account.entry(sub).unwrap();
        assert_eq!(entry.status(), EscrowStatus::ReleasedToSeller);

        let replay = account
            .handle(&EscrowCommand::ReleaseToSeller(ReleaseToSeller {
                seller_order_id: sub,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replay.is_empty());
    }

    proptest! {
        /// Property: for any refund sequence the entry stays balanced
        /// (`held == commission + payout`) and held funds never go negative.
        #[test]
        fn ledger_stays_balanced_under_refunds(
            held in 1u64..1_000_000u64,
            commission_bps in 0u32..5_000u32,
            refunds in prop::collection::vec(1u64..200_000u64, 0..6)
        ) {
            let commission = (held as u128 * commission_bps as u128 / 10_000) as u64;
            let sub = test_sub_id();
            let mut account = held_account(vec![spec(sub, held, commission)]);

            for amount in refunds {
                let result = account.handle(&EscrowCommand::ApplyEscrowRefund(ApplyEscrowRefund {
                    seller_order_id: sub,
                    amount,
                    refund_ref: None,
                    occurred_at: test_time(),
                }));
                if let Ok(events) = result {
                    for e in &events {
                        account.apply(e);
                    }
                }

                let entry = account.entry(sub).unwrap();
                prop_assert!(entry.balanced());
                prop_assert!(entry.held_amount() <= held);
            }
        }
    }
}

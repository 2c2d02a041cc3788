//! Collaborator interfaces the settlement engine consumes.
//!
//! Carts, shipping rules, promo codes, user directory and notification
//! delivery are owned by other systems; the engine talks to them through
//! these narrow traits. In-memory implementations back tests and dev
//! wiring.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use plaza_core::{BuyerId, SellerId};
use plaza_orders::{AddressSnapshot, CartLine, PromoCode, ShippingChoice, ShippingRule};

/// Everything a buyer assembled before paying: cart lines, address,
/// shipping choices and an optional promo code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutDraft {
    pub buyer_id: BuyerId,
    pub address: AddressSnapshot,
    pub lines: Vec<CartLine>,
    pub shipping_choices: Vec<ShippingChoice>,
    pub promo_code: Option<String>,
}

/// The buyer's saved checkout state. Cleared only on successful placement;
/// a failed payment leaves the cart for the retry.
pub trait CheckoutDraftSource: Send + Sync {
    fn load_draft(&self, buyer_id: BuyerId) -> Option<CheckoutDraft>;
    fn clear(&self, buyer_id: BuyerId);
}

/// The current shipping-rule set.
pub trait ShippingRuleSource: Send + Sync {
    fn rules(&self) -> Vec<ShippingRule>;
}

/// Look up an active promo code by normalized code.
pub trait PromoCodeSource: Send + Sync {
    fn lookup(&self, code: &str) -> Option<PromoCode>;
}

/// Resolve a display name for a party. Misses degrade to a fallback label —
/// a missing name never fails a settlement operation.
pub trait DisplayNameResolver: Send + Sync {
    fn buyer_name(&self, buyer_id: BuyerId) -> Option<String>;
    fn seller_name(&self, seller_id: SellerId) -> Option<String>;
}

/// A rendered notification handed to the delivery system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Send a rendered notification. Best-effort: delivery failures are logged,
/// never propagated into the settlement flow.
pub trait NotificationSender: Send + Sync {
    fn send(&self, notification: Notification);
}

/// In-memory checkout drafts (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryCheckoutDrafts {
    drafts: RwLock<HashMap<BuyerId, CheckoutDraft>>,
}

impl InMemoryCheckoutDrafts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, draft: CheckoutDraft) {
        if let Ok(mut drafts) = self.drafts.write() {
            drafts.insert(draft.buyer_id, draft);
        }
    }
}

impl CheckoutDraftSource for InMemoryCheckoutDrafts {
    fn load_draft(&self, buyer_id: BuyerId) -> Option<CheckoutDraft> {
        self.drafts.read().ok()?.get(&buyer_id).cloned()
    }

    fn clear(&self, buyer_id: BuyerId) {
        if let Ok(mut drafts) = self.drafts.write() {
            drafts.remove(&buyer_id);
        }
    }
}

/// A fixed shipping-rule set (tests/dev).
#[derive(Debug, Default)]
pub struct StaticShippingRules {
    rules: Vec<ShippingRule>,
}

impl StaticShippingRules {
    pub fn new(rules: Vec<ShippingRule>) -> Self {
        Self { rules }
    }
}

impl ShippingRuleSource for StaticShippingRules {
    fn rules(&self) -> Vec<ShippingRule> {
        self.rules.clone()
    }
}

/// A replaceable shipping-rule set (dev wiring; the rule system pushes its
/// current set here).
#[derive(Debug, Default)]
pub struct InMemoryShippingRules {
    rules: RwLock<Vec<ShippingRule>>,
}

impl InMemoryShippingRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, rules: Vec<ShippingRule>) {
        if let Ok(mut current) = self.rules.write() {
            *current = rules;
        }
    }
}

impl ShippingRuleSource for InMemoryShippingRules {
    fn rules(&self) -> Vec<ShippingRule> {
        self.rules.read().map(|r| r.clone()).unwrap_or_default()
    }
}

/// In-memory promo codes, matched on the uppercased code (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryPromoCodes {
    codes: RwLock<HashMap<String, PromoCode>>,
}

impl InMemoryPromoCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, promo: PromoCode) {
        if let Ok(mut codes) = self.codes.write() {
            codes.insert(promo.code.to_uppercase(), promo);
        }
    }
}

impl PromoCodeSource for InMemoryPromoCodes {
    fn lookup(&self, code: &str) -> Option<PromoCode> {
        self.codes.read().ok()?.get(&code.to_uppercase()).cloned()
    }
}

/// A fixed party directory (tests/dev).
#[derive(Debug, Default)]
pub struct StaticDirectory {
    buyers: RwLock<HashMap<BuyerId, String>>,
    sellers: RwLock<HashMap<SellerId, String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_buyer(&self, buyer_id: BuyerId, name: impl Into<String>) {
        if let Ok(mut buyers) = self.buyers.write() {
            buyers.insert(buyer_id, name.into());
        }
    }

    pub fn add_seller(&self, seller_id: SellerId, name: impl Into<String>) {
        if let Ok(mut sellers) = self.sellers.write() {
            sellers.insert(seller_id, name.into());
        }
    }
}

impl DisplayNameResolver for StaticDirectory {
    fn buyer_name(&self, buyer_id: BuyerId) -> Option<String> {
        self.buyers.read().ok()?.get(&buyer_id).cloned()
    }

    fn seller_name(&self, seller_id: SellerId) -> Option<String> {
        self.sellers.read().ok()?.get(&seller_id).cloned()
    }
}

/// Captures notifications instead of sending them (tests/dev).
#[derive(Debug, Default)]
pub struct RecordingNotifications {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationSender for RecordingNotifications {
    fn send(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}

//! Order status lifecycle: transition table + overall-status aggregation.

use serde::{Deserialize, Serialize};

/// Status of an order or sub-order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Paid,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
    Failed,
}

impl OrderStatus {
    /// Legal next statuses from this one.
    pub fn allowed_next(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            New => &[Paid, Cancelled, Failed],
            Paid => &[Preparing, Cancelled, Refunded],
            Preparing => &[Shipped, Cancelled, Refunded],
            Shipped => &[Delivered, Refunded],
            Delivered => &[Refunded],
            Cancelled => &[Refunded],
            Refunded => &[],
            Failed => &[],
        }
    }

    /// A transition is legal if the target equals the current status (no-op)
    /// or appears in the transition table for the current status.
    pub fn can_transition(self, target: OrderStatus) -> bool {
        self == target || self.allowed_next().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Parse a status label, normalising the legacy aliases on read.
    ///
    /// `pending` and `confirmed` are historical labels still present in
    /// stored data from before the vocabulary was closed; they map to `New`
    /// and `Paid`. This is an input adapter, not business logic.
    pub fn from_label(label: &str) -> Option<OrderStatus> {
        use OrderStatus::*;
        match label.to_ascii_lowercase().as_str() {
            "new" => Some(New),
            "pending" => Some(New),
            "paid" => Some(Paid),
            "confirmed" => Some(Paid),
            "preparing" => Some(Preparing),
            "shipped" => Some(Shipped),
            "delivered" => Some(Delivered),
            "cancelled" => Some(Cancelled),
            "refunded" => Some(Refunded),
            "failed" => Some(Failed),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        use OrderStatus::*;
        match self {
            New => "new",
            Paid => "paid",
            Preparing => "preparing",
            Shipped => "shipped",
            Delivered => "delivered",
            Cancelled => "cancelled",
            Refunded => "refunded",
            Failed => "failed",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Derive the buyer-visible overall order status from its sub-orders.
///
/// The rule is asymmetric and priority-ordered — failure and refund dominate
/// everything else:
///
/// 1. any `Failed` ⇒ `Failed`
/// 2. any `Refunded` (all or some) ⇒ `Refunded`
/// 3. all `Cancelled` ⇒ `Cancelled`
/// 4. all `Delivered` ⇒ `Delivered`
/// 5. any `Delivered` or `Shipped` ⇒ `Shipped`
/// 6. any `Preparing` ⇒ `Preparing`
/// 7. any `Paid` ⇒ `Paid`
/// 8. else ⇒ `New`
pub fn aggregate_status(statuses: &[OrderStatus]) -> OrderStatus {
    use OrderStatus::*;

    if statuses.is_empty() {
        return New;
    }
    if statuses.iter().any(|s| *s == Failed) {
        return Failed;
    }
    if statuses.iter().any(|s| *s == Refunded) {
        return Refunded;
    }
    if statuses.iter().all(|s| *s == Cancelled) {
        return Cancelled;
    }
    if statuses.iter().all(|s| *s == Delivered) {
        return Delivered;
    }
    if statuses.iter().any(|s| matches!(s, Delivered | Shipped)) {
        return Shipped;
    }
    if statuses.iter().any(|s| *s == Preparing) {
        return Preparing;
    }
    if statuses.iter().any(|s| *s == Paid) {
        return Paid;
    }
    New
}

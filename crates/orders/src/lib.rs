//! `plaza-orders` — buyer-facing order aggregate and checkout pricing.
//!
//! An order is placed once, snapshotting prices and quantities, and owns one
//! sub-order per distinct seller. Sub-order statuses move through an explicit
//! transition table; the buyer-visible overall status is derived from the
//! sub-orders, never stored independently.

pub mod checkout;
pub mod order;
pub mod status;

pub use checkout::{
    price_checkout, CartLine, CheckoutQuote, PromoCode, SellerQuote, ShippingChoice, ShippingRule,
};
pub use order::{
    AddressSnapshot, ApplyRefund, ComputeCommission, MarkPaid, Order, OrderCommand, OrderEvent,
    OrderId, OrderItem, PaymentDisposition, PlaceOrder, SellerCommissionRate, SellerOrder,
    SellerOrderDraft, SellerOrderId, ShippingSelection, Tracking, UpdateSellerStatus,
};
pub use status::{aggregate_status, OrderStatus};

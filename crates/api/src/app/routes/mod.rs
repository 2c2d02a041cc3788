//! HTTP routes, one file per domain area.

pub mod admin;
pub mod checkout;
pub mod common;
pub mod disputes;
pub mod events;
pub mod invoices;
pub mod orders;
pub mod payments;
pub mod payouts;
pub mod system;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(checkout::router())
        .merge(payments::router())
        .merge(orders::router())
        .merge(payouts::router())
        .merge(invoices::router())
        .merge(disputes::router())
        .merge(events::router())
        .merge(admin::router())
}

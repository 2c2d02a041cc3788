//! Shared handler helpers.

use axum::http::StatusCode;

use plaza_core::{AggregateId, BuyerId, SellerId};

use crate::app::errors::json_error;
use crate::context::ActorContext;

pub fn parse_id(raw: &str, what: &'static str) -> Result<AggregateId, axum::response::Response> {
    raw.parse().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what}"),
        )
    })
}

pub fn require_buyer(actor: &ActorContext) -> Result<BuyerId, axum::response::Response> {
    actor.buyer().ok_or_else(|| {
        json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "a buyer identity is required",
        )
    })
}

pub fn require_seller(actor: &ActorContext) -> Result<SellerId, axum::response::Response> {
    actor.seller().ok_or_else(|| {
        json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "a seller identity is required",
        )
    })
}

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use plaza_orders::{OrderId, SellerOrderId, Tracking};

use crate::app::routes::common::{parse_id, require_buyer, require_seller};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/orders", get(list_my_orders))
        .route("/orders/:id", get(get_settlement_snapshot))
        .route(
            "/orders/:id/sub-orders/:sub_id/status",
            post(update_sub_order_status),
        )
        .route(
            "/orders/:id/sub-orders/:sub_id/cancel",
            post(cancel_sub_order),
        )
}

pub async fn list_my_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
) -> axum::response::Response {
    if let Some(buyer_id) = actor.buyer() {
        return (StatusCode::OK, Json(services.orders.list_for_buyer(buyer_id))).into_response();
    }
    if let Some(seller_id) = actor.seller() {
        return (
            StatusCode::OK,
            Json(services.orders.list_for_seller(seller_id)),
        )
            .into_response();
    }
    errors::json_error(
        StatusCode::FORBIDDEN,
        "forbidden",
        "an actor identity is required",
    )
}

/// The full settlement picture of one order (UI/CLI rendering).
pub async fn get_settlement_snapshot(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match parse_id(&id, "order id") {
        Ok(id) => OrderId::new(id),
        Err(resp) => return resp,
    };

    match services.snapshots.settlement_snapshot(order_id) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
    }
}

/// A seller moves their own sub-order along the lifecycle.
pub async fn update_sub_order_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path((id, sub_id)): Path<(String, String)>,
    Json(body): Json<dto::UpdateStatusRequest>,
) -> axum::response::Response {
    let seller_id = match require_seller(&actor) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let order_id = match parse_id(&id, "order id") {
        Ok(id) => OrderId::new(id),
        Err(resp) => return resp,
    };
    let seller_order_id = match parse_id(&sub_id, "sub-order id") {
        Ok(id) => SellerOrderId::new(id),
        Err(resp) => return resp,
    };
    let Some(target) = dto::parse_order_status(&body.status) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_status",
            "unknown status label",
        );
    };
    let tracking = match (body.carrier, body.tracking_number) {
        (Some(carrier), Some(tracking_number)) => Some(Tracking {
            carrier,
            tracking_number,
        }),
        _ => None,
    };

    match services.fulfilment.seller_update_status(
        seller_id,
        order_id,
        seller_order_id,
        target,
        tracking,
        Utc::now(),
    ) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": target.label()})))
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// A buyer cancels their own not-yet-shipped sub-order.
pub async fn cancel_sub_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path((id, sub_id)): Path<(String, String)>,
) -> axum::response::Response {
    let buyer_id = match require_buyer(&actor) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let order_id = match parse_id(&id, "order id") {
        Ok(id) => OrderId::new(id),
        Err(resp) => return resp,
    };
    let seller_order_id = match parse_id(&sub_id, "sub-order id") {
        Ok(id) => SellerOrderId::new(id),
        Err(resp) => return resp,
    };

    match services
        .fulfilment
        .buyer_cancel(buyer_id, order_id, seller_order_id, Utc::now())
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "cancelled"})))
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use plaza_disputes::ReturnRequestId;
use plaza_orders::{OrderId, SellerOrderId};

use crate::app::routes::common::{parse_id, require_buyer, require_seller};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/disputes", post(open_dispute).get(list_my_disputes))
        .route("/disputes/:id/decision", post(decide))
        .route("/disputes/:id/resolution", post(resolve))
        .route("/disputes/:id/refund-confirmation", post(confirm_refund))
        .route("/disputes/:id/messages", post(post_message))
        .route("/disputes/:id/read", post(mark_read))
}

pub async fn open_dispute(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::OpenDisputeRequest>,
) -> axum::response::Response {
    let buyer_id = match require_buyer(&actor) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let order_id = match parse_id(&body.order_id, "order id") {
        Ok(id) => OrderId::new(id),
        Err(resp) => return resp,
    };
    let seller_order_id = match parse_id(&body.seller_order_id, "sub-order id") {
        Ok(id) => SellerOrderId::new(id),
        Err(resp) => return resp,
    };
    let Some(kind) = dto::parse_request_kind(&body.kind) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_kind",
            "kind must be return or complaint",
        );
    };

    match services.disputes.open_request(
        buyer_id,
        order_id,
        seller_order_id,
        kind,
        body.reason,
        body.description,
        Utc::now(),
    ) {
        Ok(request_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"request_id": request_id.to_string()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_my_disputes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
) -> axum::response::Response {
    if let Some(buyer_id) = actor.buyer() {
        return (
            StatusCode::OK,
            Json(services.disputes_rm.list_for_buyer(buyer_id)),
        )
            .into_response();
    }
    if let Some(seller_id) = actor.seller() {
        return (
            StatusCode::OK,
            Json(services.disputes_rm.list_for_seller(seller_id)),
        )
            .into_response();
    }
    errors::json_error(
        StatusCode::FORBIDDEN,
        "forbidden",
        "an actor identity is required",
    )
}

pub async fn decide(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DecisionRequest>,
) -> axum::response::Response {
    let seller_id = match require_seller(&actor) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let request_id = match parse_id(&id, "request id") {
        Ok(id) => ReturnRequestId::new(id),
        Err(resp) => return resp,
    };
    let Some(decision) = dto::parse_decision(&body.decision) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_decision",
            "decision must be one of: accept, propose_partial, request_info, reject",
        );
    };

    match services
        .disputes
        .decide(seller_id, request_id, decision, body.note, Utc::now())
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "decided"})))
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn resolve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ResolutionRequest>,
) -> axum::response::Response {
    let seller_id = match require_seller(&actor) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let request_id = match parse_id(&id, "request id") {
        Ok(id) => ReturnRequestId::new(id),
        Err(resp) => return resp,
    };
    let Some(resolution) = dto::parse_resolution(&body.resolution) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_resolution",
            "resolution must be one of: full_refund, partial_refund, replacement, repair, no_refund",
        );
    };

    match services.disputes.resolve(
        seller_id,
        request_id,
        resolution,
        body.refund_amount,
        Utc::now(),
    ) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "completed"})))
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn confirm_refund(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let request_id = match parse_id(&id, "request id") {
        Ok(id) => ReturnRequestId::new(id),
        Err(resp) => return resp,
    };

    match services.disputes.confirm_refund(request_id, Utc::now()) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"refund_status": "completed"})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn post_message(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::MessageRequest>,
) -> axum::response::Response {
    let request_id = match parse_id(&id, "request id") {
        Ok(id) => ReturnRequestId::new(id),
        Err(resp) => return resp,
    };

    let result = if let Some(buyer_id) = actor.buyer() {
        services
            .disputes
            .post_message_as_buyer(buyer_id, request_id, body.body, Utc::now())
    } else if let Some(seller_id) = actor.seller() {
        services
            .disputes
            .post_message_as_seller(seller_id, request_id, body.body, Utc::now())
    } else {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "an actor identity is required",
        );
    };

    match result {
        Ok(()) => (StatusCode::CREATED, Json(serde_json::json!({"status": "sent"})))
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn mark_read(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let request_id = match parse_id(&id, "request id") {
        Ok(id) => ReturnRequestId::new(id),
        Err(resp) => return resp,
    };

    let result = if let Some(buyer_id) = actor.buyer() {
        services
            .disputes
            .mark_read_as_buyer(buyer_id, request_id, Utc::now())
    } else if let Some(seller_id) = actor.seller() {
        services
            .disputes
            .mark_read_as_seller(seller_id, request_id, Utc::now())
    } else {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "an actor identity is required",
        );
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "read"}))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use crate::app::errors;
use crate::app::routes::common::require_seller;
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/invoicing/run", post(run_invoicing))
        .route("/sellers/statement", get(seller_statement))
}

/// Roll escrow commission into per-seller invoices (scheduler/ops trigger).
pub async fn run_invoicing(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.invoicing_run.run(Utc::now()) {
        Ok(touched) => (
            StatusCode::OK,
            Json(serde_json::json!({"entries_touched": touched})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Payable and invoice history for the acting seller.
pub async fn seller_statement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
) -> axum::response::Response {
    let seller_id = match require_seller(&actor) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    (
        StatusCode::OK,
        Json(services.snapshots.seller_statement(seller_id)),
    )
        .into_response()
}

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use plaza_infra::settlement::{CallbackOutcome, ProviderCallback};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/payments/callback", post(payment_callback))
}

/// The payment provider's webhook. Replays and out-of-order deliveries are
/// expected; reconciliation absorbs them and reports what actually stands.
pub async fn payment_callback(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PaymentCallbackRequest>,
) -> axum::response::Response {
    let callback = ProviderCallback {
        provider_reference: body.provider_reference,
        status: body.status,
        failure_reason: body.failure_reason,
    };

    let outcome = match services.reconciliation.handle_callback(&callback, Utc::now()) {
        Ok(outcome) => outcome,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    let response = match outcome {
        CallbackOutcome::Success {
            order_id,
            already_processed,
        } => dto::CallbackResponse {
            status: "paid",
            order_id: Some(order_id.to_string()),
            already_processed: Some(already_processed),
            issues: None,
        },
        CallbackOutcome::Pending {
            order_id,
            already_processed,
        } => dto::CallbackResponse {
            status: "pending",
            order_id: order_id.map(|id| id.to_string()),
            already_processed: Some(already_processed),
            issues: None,
        },
        CallbackOutcome::FailureRecorded {
            order_id,
            already_processed,
            reason,
        } => dto::CallbackResponse {
            status: "failed",
            order_id: order_id.map(|id| id.to_string()),
            already_processed: Some(already_processed),
            issues: reason.map(|r| vec![r]),
        },
        CallbackOutcome::Refunded {
            order_id,
            already_refunded,
        } => dto::CallbackResponse {
            status: "refunded",
            order_id: order_id.map(|id| id.to_string()),
            already_processed: Some(already_refunded),
            issues: None,
        },
        CallbackOutcome::Failed { issues } => dto::CallbackResponse {
            status: "rejected",
            order_id: None,
            already_processed: None,
            issues: Some(issues),
        },
        // Unknown reference: the buyer sees a generic expired-session page,
        // the provider gets a 200 so it stops retrying.
        CallbackOutcome::NotFound => dto::CallbackResponse {
            status: "session_expired",
            order_id: None,
            already_processed: None,
            issues: None,
        },
    };

    (StatusCode::OK, Json(response)).into_response()
}

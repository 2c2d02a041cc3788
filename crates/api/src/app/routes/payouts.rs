use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};

use plaza_infra::jobs::{Job, JobKind, JobStore};

use crate::app::routes::common::{parse_id, require_seller};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/payouts/run", post(run_payouts))
        .route("/payouts", get(list_my_payouts))
        .route("/payouts/:id/process", post(start_processing))
        .route("/payouts/:id/paid", post(mark_paid))
        .route("/payouts/:id/failed", post(mark_failed))
}

/// Batch every eligible escrow entry (scheduler/ops trigger).
pub async fn run_payouts(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.payout_run.run(Utc::now()) {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "schedules": report.batched.len(),
                "deferred_entries": report.deferred,
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_my_payouts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
) -> axum::response::Response {
    let seller_id = match require_seller(&actor) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    (
        StatusCode::OK,
        Json(services.payouts.list_for_seller(seller_id)),
    )
        .into_response()
}

pub async fn start_processing(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let schedule_id = match parse_id(&id, "schedule id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.payout_run.start_processing(schedule_id, Utc::now()) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "processing"})))
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn mark_paid(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let schedule_id = match parse_id(&id, "schedule id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.payout_run.mark_paid(schedule_id, Utc::now()) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "paid"}))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn mark_failed(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::FailScheduleRequest>,
) -> axum::response::Response {
    let schedule_id = match parse_id(&id, "schedule id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .payout_run
        .mark_failed(schedule_id, body.reason, Utc::now())
    {
        Ok(()) => {
            // The scheduler re-attempts the batch later.
            let _ = services.jobs.enqueue(Job::new(
                JobKind::PayoutRetry { schedule_id },
                Utc::now() + Duration::minutes(5),
            ));
            (StatusCode::OK, Json(serde_json::json!({"status": "failed"}))).into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

//! Collaborator data pushed in by ops tooling (dev wiring).

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};

use plaza_infra::jobs::JobStore;
use plaza_orders::{PromoCode, ShippingRule};

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/admin/shipping-rules", put(replace_shipping_rules))
        .route("/admin/promo-codes", put(add_promo_code))
        .route("/admin/jobs", get(list_jobs))
}

/// Background-job visibility for operators.
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.jobs.list(None, 200) {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "job_store_error",
            format!("{e:?}"),
        ),
    }
}

pub async fn replace_shipping_rules(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ShippingRulesRequest>,
) -> axum::response::Response {
    let mut rules = Vec::with_capacity(body.rules.len());
    for rule in &body.rules {
        let seller_id = match parse_id(&rule.seller_id, "seller id") {
            Ok(id) => plaza_core::SellerId::from_uuid(id.into()),
            Err(resp) => return resp,
        };
        rules.push(ShippingRule {
            seller_id,
            method: rule.method.clone(),
            cost: rule.cost,
        });
    }

    services.shipping_rules.replace(rules);
    (StatusCode::NO_CONTENT, ()).into_response()
}

pub async fn add_promo_code(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PromoCodeRequest>,
) -> axum::response::Response {
    services.promos.add(PromoCode {
        code: body.code,
        discount_bps: body.discount_bps,
        min_subtotal: body.min_subtotal,
    });
    (StatusCode::NO_CONTENT, ()).into_response()
}

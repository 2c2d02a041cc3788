//! Audit access to the event stream.

use std::sync::Arc;

use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use plaza_infra::event_store::{EventFilter, EventQuery, Pagination};

use crate::app::errors;
use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/events", get(query_events))
}

#[derive(Debug, Deserialize)]
pub struct EventQueryParams {
    pub aggregate_id: Option<String>,
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Orders are never deleted; the event stream is the audit trail and this
/// is how operators inspect it.
pub async fn query_events(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<EventQueryParams>,
) -> axum::response::Response {
    let aggregate_id = match params.aggregate_id.as_deref() {
        Some(raw) => match parse_id(raw, "aggregate id") {
            Ok(id) => Some(id),
            Err(resp) => return resp,
        },
        None => None,
    };

    let filter = EventFilter {
        aggregate_id,
        aggregate_type: params.aggregate_type,
        event_type: params.event_type,
        occurred_after: None,
        occurred_before: None,
    };
    let pagination = Pagination::new(params.limit, params.offset);

    match services
        .event_store
        .query_events(filter, pagination)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_error",
            format!("{e:?}"),
        ),
    }
}

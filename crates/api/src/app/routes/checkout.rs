use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::Utc;

use plaza_orders::{AddressSnapshot, CartLine, ShippingChoice};

use crate::app::routes::common::{parse_id, require_buyer};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/checkout/draft", put(save_draft))
        .route("/checkout/selection", post(create_selection))
}

/// The buyer's assembled cart, address, shipping choices and promo code.
/// Held until a provider callback settles it; cleared only on success.
pub async fn save_draft(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::SaveDraftRequest>,
) -> axum::response::Response {
    let buyer_id = match require_buyer(&actor) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let mut lines = Vec::with_capacity(body.lines.len());
    for line in &body.lines {
        let seller_id = match parse_id(&line.seller_id, "seller id") {
            Ok(id) => id.into(),
            Err(resp) => return resp,
        };
        lines.push(CartLine {
            seller_id: plaza_core::SellerId::from_uuid(seller_id),
            seller_name: line.seller_name.clone(),
            product_name: line.product_name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
        });
    }

    let mut shipping_choices = Vec::with_capacity(body.shipping_choices.len());
    for choice in &body.shipping_choices {
        let seller_id = match parse_id(&choice.seller_id, "seller id") {
            Ok(id) => id.into(),
            Err(resp) => return resp,
        };
        shipping_choices.push(ShippingChoice {
            seller_id: plaza_core::SellerId::from_uuid(seller_id),
            method: choice.method.clone(),
        });
    }

    services.drafts.save(plaza_infra::settlement::CheckoutDraft {
        buyer_id,
        address: AddressSnapshot {
            recipient: body.address.recipient,
            line1: body.address.line1,
            line2: body.address.line2,
            city: body.address.city,
            postal_code: body.address.postal_code,
            country: body.address.country,
        },
        lines,
        shipping_choices,
        promo_code: body.promo_code,
    });

    (StatusCode::NO_CONTENT, ()).into_response()
}

/// The buyer picked a payment method; the gateway issued a reference.
pub async fn create_selection(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::CreateSelectionRequest>,
) -> axum::response::Response {
    let buyer_id = match require_buyer(&actor) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let Some(method) = dto::parse_payment_method(&body.method) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_method",
            "method must be one of: card, bank_transfer, wallet",
        );
    };

    match services.checkout.create_selection(
        buyer_id,
        method,
        &body.provider_reference,
        Utc::now(),
    ) {
        Ok(selection_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"selection_id": selection_id.to_string()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

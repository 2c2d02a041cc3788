//! Actor-context extraction middleware.

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use plaza_core::{BuyerId, SellerId};

use crate::context::ActorContext;

pub const BUYER_HEADER: &str = "x-actor-buyer";
pub const SELLER_HEADER: &str = "x-actor-seller";

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Reads the forwarded actor identity into an [`ActorContext`] extension.
/// Unparseable or absent headers leave the actor anonymous; endpoints that
/// need an actor reject those requests themselves.
pub async fn actor_middleware(mut request: Request, next: Next) -> Response {
    let buyer: Option<BuyerId> = parse_header(request.headers(), BUYER_HEADER);
    let seller: Option<SellerId> = parse_header(request.headers(), SELLER_HEADER);

    request
        .extensions_mut()
        .insert(ActorContext::new(buyer, seller));

    next.run(request).await
}

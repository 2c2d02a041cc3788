//! Request/response DTOs and JSON mapping helpers.

use serde::{Deserialize, Serialize};

use plaza_disputes::{RequestKind, Resolution, SellerDecision};
use plaza_orders::OrderStatus;
use plaza_payments::PaymentMethod;

/// PUT /checkout/draft
#[derive(Debug, Deserialize)]
pub struct SaveDraftRequest {
    pub address: AddressDto,
    pub lines: Vec<CartLineDto>,
    pub shipping_choices: Vec<ShippingChoiceDto>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddressDto {
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct CartLineDto {
    pub seller_id: String,
    pub seller_name: String,
    pub product_name: String,
    pub unit_price: u64,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ShippingChoiceDto {
    pub seller_id: String,
    pub method: String,
}

/// POST /checkout/selection
#[derive(Debug, Deserialize)]
pub struct CreateSelectionRequest {
    pub method: String,
    pub provider_reference: String,
}

/// POST /payments/callback
#[derive(Debug, Deserialize)]
pub struct PaymentCallbackRequest {
    pub provider_reference: String,
    pub status: String,
    pub failure_reason: Option<String>,
}

/// POST /orders/:id/sub-orders/:sub_id/status
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
}

/// POST /disputes
#[derive(Debug, Deserialize)]
pub struct OpenDisputeRequest {
    pub order_id: String,
    pub seller_order_id: String,
    pub kind: String,
    pub reason: String,
    pub description: Option<String>,
}

/// POST /disputes/:id/decision
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: String,
    pub note: Option<String>,
}

/// POST /disputes/:id/resolution
#[derive(Debug, Deserialize)]
pub struct ResolutionRequest {
    pub resolution: String,
    pub refund_amount: Option<u64>,
}

/// POST /disputes/:id/messages
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub body: String,
}

/// POST /payouts/:id/fail
#[derive(Debug, Deserialize)]
pub struct FailScheduleRequest {
    pub reason: String,
}

/// PUT /admin/shipping-rules
#[derive(Debug, Deserialize)]
pub struct ShippingRulesRequest {
    pub rules: Vec<ShippingRuleDto>,
}

#[derive(Debug, Deserialize)]
pub struct ShippingRuleDto {
    pub seller_id: String,
    pub method: String,
    pub cost: u64,
}

/// PUT /admin/promo-codes
#[derive(Debug, Deserialize)]
pub struct PromoCodeRequest {
    pub code: String,
    pub discount_bps: u32,
    pub min_subtotal: u64,
}

/// Buyer/seller-facing payment outcome labels (never raw internals).
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_processed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<String>>,
}

pub fn parse_payment_method(s: &str) -> Option<PaymentMethod> {
    match s.to_ascii_lowercase().as_str() {
        "card" => Some(PaymentMethod::Card),
        "bank_transfer" => Some(PaymentMethod::BankTransfer),
        "wallet" => Some(PaymentMethod::Wallet),
        _ => None,
    }
}

pub fn parse_order_status(s: &str) -> Option<OrderStatus> {
    OrderStatus::from_label(s)
}

pub fn parse_request_kind(s: &str) -> Option<RequestKind> {
    match s.to_ascii_lowercase().as_str() {
        "return" => Some(RequestKind::Return),
        "complaint" => Some(RequestKind::Complaint),
        _ => None,
    }
}

pub fn parse_decision(s: &str) -> Option<SellerDecision> {
    match s.to_ascii_lowercase().as_str() {
        "accept" => Some(SellerDecision::Accept),
        "propose_partial" => Some(SellerDecision::ProposePartial),
        "request_info" => Some(SellerDecision::RequestInfo),
        "reject" => Some(SellerDecision::Reject),
        _ => None,
    }
}

pub fn parse_resolution(s: &str) -> Option<Resolution> {
    match s.to_ascii_lowercase().as_str() {
        "full_refund" => Some(Resolution::FullRefund),
        "partial_refund" => Some(Resolution::PartialRefund),
        "replacement" => Some(Resolution::Replacement),
        "repair" => Some(Resolution::Repair),
        "no_refund" => Some(Resolution::NoRefund),
        _ => None,
    }
}

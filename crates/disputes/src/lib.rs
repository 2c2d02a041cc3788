//! `plaza-disputes` — post-sale returns and complaints.
//!
//! A return request is scoped to one sub-order. The seller decides it while
//! it is `Requested`; a resolution completes it, and refund resolutions feed
//! back into the escrow ledger. Each request carries an append-only message
//! thread with per-party unread counters.

pub mod request;

pub use request::{
    ConfirmRefund, MarkRead, OpenRequest, Party, PostMessage, RequestKind, RequestMessage,
    RequestStatus, Resolution, Resolve, ReturnRequest, ReturnRequestCommand, ReturnRequestEvent,
    ReturnRequestId, RefundStatus, SellerDecide, SellerDecision,
};

//! Request-scoped actor context.
//!
//! Authentication itself is an external collaborator: the gateway in front
//! of this service resolves the session and forwards the actor identity in
//! headers. Ownership checks (a seller acting on another seller's sub-order)
//! still happen in the settlement services and yield 403 here.

use plaza_core::{BuyerId, SellerId};

#[derive(Debug, Clone, Copy, Default)]
pub struct ActorContext {
    buyer: Option<BuyerId>,
    seller: Option<SellerId>,
}

impl ActorContext {
    pub fn new(buyer: Option<BuyerId>, seller: Option<SellerId>) -> Self {
        Self { buyer, seller }
    }

    pub fn buyer(&self) -> Option<BuyerId> {
        self.buyer
    }

    pub fn seller(&self) -> Option<SellerId> {
        self.seller
    }
}

//! Provider-reference → payment-selection index.
//!
//! The provider reference is the gateway's idempotency key. This registry is
//! the uniqueness point for it: one reference maps to exactly one selection,
//! and a buyer has at most one pending selection at a time.

use std::collections::HashMap;
use std::sync::Mutex;

use plaza_core::{BuyerId, DomainError, DomainResult};
use plaza_payments::SelectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The reference was new; a fresh selection id was minted.
    Fresh {
        selection_id: SelectionId,
        /// The buyer's previous pending selection, superseded by this one.
        superseded: Option<SelectionId>,
    },
    /// The reference was already registered (idempotent re-registration).
    Existing { selection_id: SelectionId },
}

#[derive(Debug, Default)]
struct Inner {
    by_reference: HashMap<String, SelectionId>,
    pending_by_buyer: HashMap<BuyerId, SelectionId>,
}

/// In-memory selection registry.
#[derive(Debug, Default)]
pub struct SelectionRegistry {
    inner: Mutex<Inner>,
}

impl SelectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a provider reference to its selection.
    pub fn lookup(&self, provider_reference: &str) -> Option<SelectionId> {
        self.inner
            .lock()
            .ok()?
            .by_reference
            .get(provider_reference)
            .copied()
    }

    /// Register a reference for a buyer, minting a selection id.
    ///
    /// Registering the same reference twice returns the existing id — the
    /// uniqueness invariant is a property of this map, checked and written
    /// under one lock.
    pub fn register(
        &self,
        buyer_id: BuyerId,
        provider_reference: &str,
        selection_id: SelectionId,
    ) -> DomainResult<Registration> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| DomainError::conflict("selection registry lock poisoned"))?;

        if let Some(existing) = inner.by_reference.get(provider_reference) {
            return Ok(Registration::Existing {
                selection_id: *existing,
            });
        }

        let superseded = inner.pending_by_buyer.insert(buyer_id, selection_id);
        inner
            .by_reference
            .insert(provider_reference.to_string(), selection_id);

        Ok(Registration::Fresh {
            selection_id,
            superseded,
        })
    }

    /// Drop the buyer's pending marker once their selection reaches a final
    /// status (paid, failed, refunded).
    pub fn settle_pending(&self, buyer_id: BuyerId, selection_id: SelectionId) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.pending_by_buyer.get(&buyer_id) == Some(&selection_id) {
                inner.pending_by_buyer.remove(&buyer_id);
            }
        }
    }
}

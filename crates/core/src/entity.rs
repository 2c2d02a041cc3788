//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Entities live **inside** an aggregate (sub-orders inside an order, ledger
/// entries inside an escrow account) and are addressed by id through the
/// owning aggregate — never by live back-pointers.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

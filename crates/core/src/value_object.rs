//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; they
/// carry no identity of their own. An address snapshot on an order or a
/// payout period are value objects: two with the same fields are the same
/// value. To "modify" one, construct a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

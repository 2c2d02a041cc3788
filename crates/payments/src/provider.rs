//! Provider status vocabulary and its mapping to the internal status.

use serde::{Deserialize, Serialize};

/// Internal payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Map a provider's status string to the internal status.
///
/// Case-insensitive. Providers report many spellings for the same outcome;
/// anything outside the known vocabulary is treated as a failure rather than
/// guessed at.
pub fn map_provider_status(provider_status: &str) -> PaymentStatus {
    match provider_status.to_ascii_lowercase().as_str() {
        "success" | "paid" | "completed" | "authorized" => PaymentStatus::Paid,
        "pending" | "processing" | "awaiting_payment" => PaymentStatus::Pending,
        "failed" | "error" | "cancelled" | "canceled" => PaymentStatus::Failed,
        "refunded" | "refund" => PaymentStatus::Refunded,
        _ => PaymentStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vocabulary_maps_per_table() {
        for s in ["success", "paid", "completed", "authorized"] {
            assert_eq!(map_provider_status(s), PaymentStatus::Paid);
        }
        for s in ["pending", "processing", "awaiting_payment"] {
            assert_eq!(map_provider_status(s), PaymentStatus::Pending);
        }
        for s in ["failed", "error", "cancelled", "canceled"] {
            assert_eq!(map_provider_status(s), PaymentStatus::Failed);
        }
        for s in ["refunded", "refund"] {
            assert_eq!(map_provider_status(s), PaymentStatus::Refunded);
        }
    }

    #[test]
    fn mapping_is_case_insensitive() {
        assert_eq!(map_provider_status("SUCCESS"), PaymentStatus::Paid);
        assert_eq!(map_provider_status("Awaiting_Payment"), PaymentStatus::Pending);
        assert_eq!(map_provider_status("Refund"), PaymentStatus::Refunded);
    }

    #[test]
    fn unknown_values_default_to_failed() {
        assert_eq!(map_provider_status("on_hold"), PaymentStatus::Failed);
        assert_eq!(map_provider_status(""), PaymentStatus::Failed);
    }
}

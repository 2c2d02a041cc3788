//! Monetary helpers.
//!
//! Amounts are unsigned integers in the smallest currency unit (cents).
//! Signed intermediates go through `i128` so products and sums cannot
//! silently wrap.

use crate::error::{DomainError, DomainResult};

/// Amount in smallest currency unit (e.g., cents).
pub type Amount = u64;

/// `unit_price × quantity` with overflow checking.
pub fn line_total(unit_price: Amount, quantity: i64) -> DomainResult<Amount> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    let total = (unit_price as i128)
        .checked_mul(quantity as i128)
        .ok_or_else(|| DomainError::invariant("line amount overflow"))?;
    u64::try_from(total).map_err(|_| DomainError::invariant("line amount overflow"))
}

/// Basis-point share of an amount, truncating toward zero.
///
/// `bps_share(8_000, 1_000)` is 800 (10% of 80.00).
pub fn bps_share(amount: Amount, bps: u32) -> Amount {
    ((amount as i128 * bps as i128) / 10_000) as u64
}

/// Split `total` across `weights` proportionally, largest-remainder rounding.
///
/// The returned shares always sum to exactly `total`; leftover cents from
/// truncation go to the largest weights first. Used to allocate an
/// order-level discount across seller slices so the per-seller totals add up
/// to the buyer-facing total with no drift.
pub fn allocate_proportional(total: Amount, weights: &[Amount]) -> Vec<Amount> {
    let weight_sum: i128 = weights.iter().map(|w| *w as i128).sum();
    if weight_sum == 0 || total == 0 {
        return vec![0; weights.len()];
    }

    let mut shares: Vec<Amount> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(usize, i128)> = Vec::with_capacity(weights.len());
    let mut allocated: i128 = 0;

    for (idx, w) in weights.iter().enumerate() {
        let exact = (total as i128) * (*w as i128);
        let share = exact / weight_sum;
        allocated += share;
        shares.push(share as u64);
        remainders.push((idx, exact % weight_sum));
    }

    // Hand out the leftover cents to the largest remainders.
    let mut leftover = total as i128 - allocated;
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (idx, _) in remainders {
        if leftover == 0 {
            break;
        }
        shares[idx] += 1;
        leftover -= 1;
    }

    shares
}

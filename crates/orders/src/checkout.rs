//! Checkout pricing calculator (pure, no state).
//!
//! Given cart lines, the shipping-rule set, the buyer's shipping choices and
//! an optional promo code, computes subtotal, shipping, discount and grand
//! total broken down per seller. Order placement snapshots the result.

use serde::{Deserialize, Serialize};

use plaza_core::money::{allocate_proportional, bps_share, line_total, Amount};
use plaza_core::{DomainError, DomainResult, SellerId};

/// One cart line, as captured at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub seller_id: SellerId,
    pub seller_name: String,
    pub product_name: String,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: Amount,
    pub quantity: i64,
}

/// A shipping option a seller offers (from the shipping-rule collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRule {
    pub seller_id: SellerId,
    pub method: String,
    pub cost: Amount,
}

/// The buyer's chosen shipping method for one seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingChoice {
    pub seller_id: SellerId,
    pub method: String,
}

/// An active promo code (from the promo collaborator), already normalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    /// Discount on the items subtotal, in basis points.
    pub discount_bps: u32,
    /// Minimum items subtotal for the code to apply.
    pub min_subtotal: Amount,
}

/// One seller's priced slice of the checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerQuote {
    pub seller_id: SellerId,
    pub seller_name: String,
    pub lines: Vec<CartLine>,
    pub subtotal: Amount,
    pub shipping_method: String,
    pub shipping: Amount,
    pub discount: Amount,
    pub total: Amount,
}

/// The fully priced checkout.
///
/// Invariants on construction: `grand_total = items_subtotal + shipping_total
/// - discount_total`, and the seller totals sum to the grand total exactly
/// (discount rounding is settled across sellers at pricing time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutQuote {
    pub sellers: Vec<SellerQuote>,
    pub items_subtotal: Amount,
    pub shipping_total: Amount,
    pub discount_total: Amount,
    pub grand_total: Amount,
}

/// Price a cart. Collects every problem into one `ValidationFailed` so the
/// caller can re-prompt with the full list.
pub fn price_checkout(
    lines: &[CartLine],
    choices: &[ShippingChoice],
    rules: &[ShippingRule],
    promo: Option<&PromoCode>,
) -> DomainResult<CheckoutQuote> {
    let mut issues: Vec<String> = Vec::new();

    if lines.is_empty() {
        issues.push("cart is empty".to_string());
    }

    // Group lines per seller, preserving cart order.
    let mut seller_order: Vec<SellerId> = Vec::new();
    for line in lines {
        if line.quantity <= 0 {
            issues.push(format!(
                "quantity for '{}' must be positive",
                line.product_name
            ));
        }
        if line.unit_price == 0 {
            issues.push(format!("price for '{}' is missing", line.product_name));
        }
        if !seller_order.contains(&line.seller_id) {
            seller_order.push(line.seller_id);
        }
    }

    // Resolve a shipping rule for every seller in the cart.
    let mut resolved_shipping: Vec<(SellerId, String, Amount)> = Vec::new();
    for seller_id in &seller_order {
        match choices.iter().find(|c| c.seller_id == *seller_id) {
            None => issues.push(format!("no shipping method selected for seller {seller_id}")),
            Some(choice) => {
                match rules
                    .iter()
                    .find(|r| r.seller_id == *seller_id && r.method == choice.method)
                {
                    None => issues.push(format!(
                        "shipping method '{}' is not available for seller {seller_id}",
                        choice.method
                    )),
                    Some(rule) => {
                        resolved_shipping.push((*seller_id, rule.method.clone(), rule.cost))
                    }
                }
            }
        }
    }

    if !issues.is_empty() {
        return Err(DomainError::validation_failed(issues));
    }

    // Per-seller subtotals.
    let mut subtotals: Vec<Amount> = Vec::with_capacity(seller_order.len());
    for seller_id in &seller_order {
        let mut subtotal: Amount = 0;
        for line in lines.iter().filter(|l| l.seller_id == *seller_id) {
            subtotal = subtotal
                .checked_add(line_total(line.unit_price, line.quantity)?)
                .ok_or_else(|| DomainError::invariant("cart subtotal overflow"))?;
        }
        subtotals.push(subtotal);
    }
    let items_subtotal: Amount = subtotals.iter().sum();

    // Promo discount on the items subtotal, split across sellers
    // proportionally to their subtotal.
    let discount_total = match promo {
        Some(p) if items_subtotal >= p.min_subtotal => bps_share(items_subtotal, p.discount_bps),
        Some(p) => {
            return Err(DomainError::validation_failed(vec![format!(
                "promo code '{}' requires a minimum order of {}",
                p.code, p.min_subtotal
            )]));
        }
        None => 0,
    };
    let discounts = allocate_proportional(discount_total, &subtotals);

    let mut sellers: Vec<SellerQuote> = Vec::with_capacity(seller_order.len());
    let mut shipping_total: Amount = 0;
    let mut grand_total: Amount = 0;

    for (idx, seller_id) in seller_order.iter().enumerate() {
        let seller_lines: Vec<CartLine> = lines
            .iter()
            .filter(|l| l.seller_id == *seller_id)
            .cloned()
            .collect();
        let seller_name = seller_lines[0].seller_name.clone();
        let (_, method, shipping) = resolved_shipping
            .iter()
            .find(|(s, _, _)| s == seller_id)
            .cloned()
            .ok_or_else(|| DomainError::invariant("shipping resolution lost a seller"))?;

        let subtotal = subtotals[idx];
        let discount = discounts[idx];
        let total = subtotal + shipping - discount;

        shipping_total += shipping;
        grand_total += total;

        sellers.push(SellerQuote {
            seller_id: *seller_id,
            seller_name,
            lines: seller_lines,
            subtotal,
            shipping_method: method,
            shipping,
            discount,
            total,
        });
    }

    debug_assert_eq!(
        grand_total,
        items_subtotal + shipping_total - discount_total
    );

    Ok(CheckoutQuote {
        sellers,
        items_subtotal,
        shipping_total,
        discount_total,
        grand_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seller(n: u8) -> SellerId {
        SellerId::from_uuid(uuid::Uuid::from_u128(n as u128))
    }

    fn line(s: SellerId, name: &str, price: Amount, qty: i64) -> CartLine {
        CartLine {
            seller_id: s,
            seller_name: format!("seller-{s}"),
            product_name: name.to_string(),
            unit_price: price,
            quantity: qty,
        }
    }

    fn standard_shipping(s: SellerId, cost: Amount) -> (ShippingRule, ShippingChoice) {
        (
            ShippingRule {
                seller_id: s,
                method: "standard".to_string(),
                cost,
            },
            ShippingChoice {
                seller_id: s,
                method: "standard".to_string(),
            },
        )
    }

    #[test]
    fn two_seller_cart_prices_per_seller() {
        let (a, b) = (seller(1), seller(2));
        let lines = vec![line(a, "lamp", 4_000, 2), line(b, "mug", 2_000, 2)];
        let (rule_a, choice_a) = standard_shipping(a, 0);
        let (rule_b, choice_b) = standard_shipping(b, 0);

        let quote = price_checkout(
            &lines,
            &[choice_a, choice_b],
            &[rule_a, rule_b],
            None,
        )
        .unwrap();

        assert_eq!(quote.sellers.len(), 2);
        assert_eq!(quote.sellers[0].subtotal, 8_000);
        assert_eq!(quote.sellers[1].subtotal, 4_000);
        assert_eq!(quote.items_subtotal, 12_000);
        assert_eq!(quote.grand_total, 12_000);
    }

    #[test]
    fn missing_shipping_choice_is_collected_as_issue() {
        let (a, b) = (seller(1), seller(2));
        let lines = vec![line(a, "lamp", 4_000, 1), line(b, "mug", 2_000, 1)];
        let (rule_a, choice_a) = standard_shipping(a, 500);

        let err = price_checkout(&lines, &[choice_a], &[rule_a], None).unwrap_err();
        match err {
            DomainError::ValidationFailed(issues) => {
                assert_eq!(issues.len(), 1);
                assert!(issues[0].contains("no shipping method selected"));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        let err = price_checkout(&[], &[], &[], None).unwrap_err();
        match err {
            DomainError::ValidationFailed(issues) => {
                assert!(issues.iter().any(|i| i.contains("cart is empty")));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn promo_discount_is_split_proportionally() {
        let (a, b) = (seller(1), seller(2));
        let lines = vec![line(a, "lamp", 8_000, 1), line(b, "mug", 4_000, 1)];
        let (rule_a, choice_a) = standard_shipping(a, 0);
        let (rule_b, choice_b) = standard_shipping(b, 0);
        let promo = PromoCode {
            code: "SAVE10".to_string(),
            discount_bps: 1_000,
            min_subtotal: 0,
        };

        let quote = price_checkout(
            &lines,
            &[choice_a, choice_b],
            &[rule_a, rule_b],
            Some(&promo),
        )
        .unwrap();

        assert_eq!(quote.discount_total, 1_200);
        assert_eq!(quote.sellers[0].discount, 800);
        assert_eq!(quote.sellers[1].discount, 400);
        assert_eq!(quote.grand_total, 10_800);
        let seller_sum: Amount = quote.sellers.iter().map(|s| s.total).sum();
        assert_eq!(seller_sum, quote.grand_total);
    }

    #[test]
    fn promo_below_minimum_subtotal_is_rejected() {
        let a = seller(1);
        let lines = vec![line(a, "mug", 1_000, 1)];
        let (rule_a, choice_a) = standard_shipping(a, 0);
        let promo = PromoCode {
            code: "BIG".to_string(),
            discount_bps: 500,
            min_subtotal: 5_000,
        };

        let err = price_checkout(&lines, &[choice_a], &[rule_a], Some(&promo)).unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }

    proptest! {
        /// Property: seller slices always sum to the grand total, whatever
        /// the cart shape and discount.
        #[test]
        fn seller_totals_sum_to_grand_total(
            prices in prop::collection::vec(1u64..100_000u64, 1..6),
            discount_bps in 0u32..3_000u32,
        ) {
            let lines: Vec<CartLine> = prices
                .iter()
                .enumerate()
                .map(|(i, p)| line(seller((i % 3) as u8 + 1), &format!("item-{i}"), *p, 1))
                .collect();

            let mut rules = Vec::new();
            let mut choices = Vec::new();
            for n in 1..=3u8 {
                let (r, c) = standard_shipping(seller(n), 250);
                rules.push(r);
                choices.push(c);
            }

            let promo = PromoCode {
                code: "P".to_string(),
                discount_bps,
                min_subtotal: 0,
            };

            let quote = price_checkout(&lines, &choices, &rules, Some(&promo)).unwrap();
            let seller_sum: u128 = quote.sellers.iter().map(|s| s.total as u128).sum();
            prop_assert_eq!(seller_sum, quote.grand_total as u128);
            prop_assert_eq!(
                quote.grand_total,
                quote.items_subtotal + quote.shipping_total - quote.discount_total
            );
        }
    }
}

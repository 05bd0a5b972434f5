//! Property-based tests for pricing and gateway amount conversion.
//!
//! These tests use proptest to verify invariants across a wide range of inputs,
//! helping to catch edge cases that unit tests might miss.

use food_order_api::models::order::OrderLineItem;
use food_order_api::services::payment_gateway::{build_line_items, to_minor_units};
use food_order_api::services::pricing::{
    compute_totals, normalize_quantity, round_money, CartLine, PricingPolicy,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..5_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn line_strategy() -> impl Strategy<Value = OrderLineItem> {
    ("[a-z]{3,8}", price_strategy(), 1u32..50).prop_map(|(id, unit_price, quantity)| {
        OrderLineItem {
            name: format!("Item {id}"),
            item_id: id,
            unit_price,
            quantity,
        }
    })
}

fn policy_strategy() -> impl Strategy<Value = PricingPolicy> {
    (0i64..=100, 0i64..10_000).prop_map(|(tax_pct, shipping_cents)| PricingPolicy {
        tax_rate: Decimal::new(tax_pct, 2),
        shipping_fee: Decimal::new(shipping_cents, 2),
        minimum_order_amount: Decimal::ZERO,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn total_is_the_sum_of_its_parts(
        lines in prop::collection::vec(line_strategy(), 1..10),
        policy in policy_strategy(),
    ) {
        let totals = compute_totals(&lines, &policy);

        prop_assert_eq!(totals.total, totals.subtotal + totals.tax + totals.shipping);
        prop_assert_eq!(totals.subtotal.scale(), 2);
        prop_assert_eq!(totals.tax.scale(), 2);
        prop_assert!(totals.tax <= totals.subtotal);
    }

    #[test]
    fn gateway_lines_add_up_to_the_order_total(
        lines in prop::collection::vec(line_strategy(), 1..10),
        policy in policy_strategy(),
    ) {
        let totals = compute_totals(&lines, &policy);
        let items = build_line_items(&lines, &totals).unwrap();

        let sum: i64 = items
            .iter()
            .map(|i| i.unit_amount_minor * i64::from(i.quantity))
            .sum();
        prop_assert_eq!(sum, to_minor_units(totals.total).unwrap());
        prop_assert!(items.iter().all(|i| i.unit_amount_minor >= 0));
    }

    #[test]
    fn minor_units_are_exact_for_two_place_amounts(cents in 0i64..1_000_000_000) {
        prop_assert_eq!(to_minor_units(Decimal::new(cents, 2)).unwrap(), cents);
    }

    #[test]
    fn rounding_is_idempotent(mantissa in -1_000_000_000i64..1_000_000_000, scale in 0u32..6) {
        let once = round_money(Decimal::new(mantissa, scale));
        prop_assert_eq!(round_money(once), once);
        prop_assert_eq!(once.scale(), 2);
    }

    #[test]
    fn quantities_are_always_at_least_one(raw in prop_oneof![
        any::<i64>().prop_map(|v| json!(v)),
        any::<f64>().prop_map(|v| json!(v)),
        ".*".prop_map(|s| json!(s)),
        Just(json!(null)),
        Just(json!(true)),
    ]) {
        prop_assert!(normalize_quantity(Some(&raw)) >= 1);
    }

    #[test]
    fn client_prices_never_reach_the_cart_line(
        price in any::<f64>().prop_filter("finite", |p| p.is_finite()),
        quantity in 1u32..100,
    ) {
        let line: CartLine = serde_json::from_value(json!({
            "_id": "thali",
            "name": "Whatever",
            "price": price,
            "quantity": quantity,
        }))
        .unwrap();

        let reserialized = serde_json::to_value(&line).unwrap();
        prop_assert!(reserialized.get("price").is_none());
        prop_assert_eq!(line.item_id.as_str(), "thali");
        prop_assert_eq!(normalize_quantity(line.quantity.as_ref()), quantity);
    }
}

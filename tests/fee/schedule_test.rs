// Fee Schedule Tests
// Tier lookup, boundary exactness, and the payment split

use deed_escrow::fee::{
    payment_breakdown, stamp_percentage, Category, FeeError, FeeSchedule, FeeTier,
};
use rust_decimal::Decimal;
use std::str::FromStr;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// TIER BOUNDARIES
// ============================================================================

#[test]
fn test_sale_tier_left_closed() {
    assert_eq!(stamp_percentage(dec("1"), Category::Sale).unwrap(), dec("3"));
    assert_eq!(stamp_percentage(dec("0.9999"), Category::Sale).unwrap(), dec("2"));
    assert_eq!(stamp_percentage(dec("0.999999"), Category::Sale).unwrap(), dec("2"));
}

#[test]
fn test_sale_tiers_across_range() {
    let cases = [
        ("0", "2"),
        ("1.5", "3"),
        ("2", "4"),
        ("4.999999", "4"),
        ("5", "5"),
        ("9.99", "5"),
        ("10", "6"),
        ("1000000", "6"),
    ];
    for (amount, expected) in cases {
        assert_eq!(
            stamp_percentage(dec(amount), Category::Sale).unwrap(),
            dec(expected),
            "amount {}",
            amount
        );
    }
}

#[test]
fn test_fractional_percentages() {
    assert_eq!(stamp_percentage(dec("3"), Category::Gift).unwrap(), dec("1.5"));
    assert_eq!(stamp_percentage(dec("0.5"), Category::Lease).unwrap(), dec("0.5"));
    assert_eq!(stamp_percentage(dec("7"), Category::Transfer).unwrap(), dec("3.5"));
}

#[test]
fn test_unknown_category_uses_default_table() {
    let category = Category::from_str("auction").unwrap();
    assert_eq!(category, Category::Other);
    assert_eq!(stamp_percentage(dec("0.5"), category).unwrap(), dec("2"));
    assert_eq!(stamp_percentage(dec("3"), category).unwrap(), dec("3"));
    assert_eq!(stamp_percentage(dec("50"), category).unwrap(), dec("4"));
}

#[test]
fn test_category_parse_is_case_insensitive() {
    assert_eq!(Category::from_str("SALE").unwrap(), Category::Sale);
    assert_eq!(Category::from_str(" mortgage ").unwrap(), Category::Mortgage);
}

#[test]
fn test_negative_amount_rejected() {
    let result = stamp_percentage(dec("-0.01"), Category::Sale);
    assert!(matches!(result, Err(FeeError::InvalidAmount(_))));

    let result = payment_breakdown(dec("-5"), Category::Gift);
    assert!(matches!(result, Err(FeeError::InvalidAmount(_))));
}

// ============================================================================
// PAYMENT BREAKDOWN
// ============================================================================

#[test]
fn test_full_sale_at_ten() {
    let breakdown = payment_breakdown(dec("10"), Category::Sale).unwrap();

    assert_eq!(breakdown.total_price, dec("10"));
    assert_eq!(breakdown.stamp_fee_percentage, dec("6"));
    assert_eq!(breakdown.stamp_fee, dec("0.6"));
    assert_eq!(breakdown.seller_amount, dec("9.4"));
}

#[test]
fn test_breakdown_sums_to_total_at_boundaries() {
    let amounts = [
        "0", "0.000001", "0.999999", "1", "1.000001", "1.999999", "2", "4.999999", "5", "9.999999",
        "10", "123.456789", "0.333333",
    ];
    for category in Category::ALL {
        for amount in amounts {
            let b = payment_breakdown(dec(amount), category).unwrap();
            assert_eq!(b.stamp_fee + b.seller_amount, b.total_price, "{} {}", category, amount);
        }
    }
}

#[test]
fn test_stamp_fee_rounded_to_token_precision() {
    // 0.333333 * 2% = 0.00666666 -> 0.006667
    let b = payment_breakdown(dec("0.333333"), Category::Sale).unwrap();
    assert_eq!(b.stamp_fee, dec("0.006667"));
    assert_eq!(b.seller_amount, dec("0.326666"));
}

// ============================================================================
// CUSTOM SCHEDULES
// ============================================================================

#[test]
fn test_custom_table_replaces_category() {
    let tiers = vec![
        FeeTier::new(dec("0"), Some(dec("100")), dec("1")),
        FeeTier::new(dec("100"), None, dec("0.5")),
    ];
    let schedule = FeeSchedule::standard().with_table(Category::Sale, tiers).unwrap();

    assert_eq!(schedule.stamp_percentage(dec("50"), Category::Sale).unwrap(), dec("1"));
    assert_eq!(schedule.stamp_percentage(dec("100"), Category::Sale).unwrap(), dec("0.5"));
}

#[test]
fn test_table_with_gap_rejected() {
    let tiers = vec![
        FeeTier::new(dec("0"), Some(dec("1")), dec("1")),
        FeeTier::new(dec("2"), None, dec("2")),
    ];
    assert!(matches!(
        FeeSchedule::validate_table(&tiers),
        Err(FeeError::InvalidSchedule(_))
    ));
}

#[test]
fn test_table_must_end_unbounded() {
    let tiers = vec![FeeTier::new(dec("0"), Some(dec("1")), dec("1"))];
    assert!(FeeSchedule::validate_table(&tiers).is_err());
}

#[test]
fn test_table_must_start_at_zero() {
    let tiers = vec![FeeTier::new(dec("1"), None, dec("1"))];
    assert!(FeeSchedule::validate_table(&tiers).is_err());
    assert!(FeeSchedule::validate_table(&[]).is_err());
}

//! Property-based tests for the money invariants.
//!
//! These use proptest to verify the discount and refund bounds across a wide
//! range of inputs.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use chargekit_billing::{Coupon, DiscountApplication, DiscountKind, IntentStatus};
use chargekit_providers::Amount;

fn percentage_coupon(rate: i64) -> Coupon {
    Coupon::new(
        "PROP",
        DiscountKind::Percentage {
            rate: Decimal::from(rate),
        },
        Utc::now() + Duration::days(1),
    )
}

fn fixed_coupon(cents: i64) -> Coupon {
    Coupon::new(
        "PROP",
        DiscountKind::Fixed {
            amount: Amount::from_cents(cents),
        },
        Utc::now() + Duration::days(1),
    )
}

proptest! {
    /// finalAmount = max(0, originalAmount − discount), for any percentage.
    #[test]
    fn percentage_discount_never_exceeds_original(
        cents in 0i64..10_000_000i64,
        rate in 0i64..=100i64,
    ) {
        let original = Amount::from_cents(cents);
        let coupon = percentage_coupon(rate);

        let final_amount = coupon.apply_to(original);
        let discount = coupon.discount_for(original);

        prop_assert!(final_amount <= original);
        prop_assert!(discount <= original);
        prop_assert!(final_amount >= Amount::ZERO);
        prop_assert_eq!(final_amount, original.sub_floor_zero(discount));
    }

    /// Fixed discounts floor at zero instead of going negative.
    #[test]
    fn fixed_discount_floors_at_zero(
        cents in 0i64..1_000_000i64,
        off in 0i64..2_000_000i64,
    ) {
        let original = Amount::from_cents(cents);
        let coupon = fixed_coupon(off);

        let final_amount = coupon.apply_to(original);
        prop_assert!(final_amount <= original);
        prop_assert!(final_amount >= Amount::ZERO);
        if off >= cents {
            prop_assert!(final_amount.is_zero());
        }
    }

    /// A 100% coupon always prices to exactly zero.
    #[test]
    fn hundred_percent_is_always_free(cents in 0i64..10_000_000i64) {
        let coupon = percentage_coupon(100);
        prop_assert!(coupon.apply_to(Amount::from_cents(cents)).is_zero());
    }

    /// The recorded application is internally consistent.
    #[test]
    fn application_splits_add_up(
        cents in 1i64..10_000_000i64,
        rate in 0i64..=100i64,
    ) {
        let original = Amount::from_cents(cents);
        let app = DiscountApplication::new(&percentage_coupon(rate), 1, original);

        prop_assert_eq!(
            app.final_amount.checked_add(app.amount_off).unwrap(),
            app.original_amount
        );
    }

    /// Accumulated partial refunds never exceed the charge: the remaining
    /// balance after any prefix of refunds is always in [0, amount].
    #[test]
    fn refund_balance_stays_bounded(
        cents in 1i64..1_000_000i64,
        parts in proptest::collection::vec(1i64..500_000i64, 0..8),
    ) {
        let amount = Amount::from_cents(cents);
        let mut refunded = Amount::ZERO;

        for part in parts {
            let request = Amount::from_cents(part);
            let remaining = amount.sub_floor_zero(refunded);
            // The coordinator only accepts refunds within the remainder
            if request <= remaining {
                refunded = refunded.checked_add(request).unwrap();
            }
            prop_assert!(refunded <= amount);
            prop_assert!(amount.sub_floor_zero(refunded) >= Amount::ZERO);
        }
    }

    /// Terminal statuses accept no outgoing transitions.
    #[test]
    fn terminal_statuses_are_terminal(next in prop::sample::select(vec![
        IntentStatus::Pending,
        IntentStatus::Processing,
        IntentStatus::Completed,
        IntentStatus::Failed,
        IntentStatus::Refunded,
    ])) {
        prop_assert!(!IntentStatus::Failed.can_transition_to(next));
        prop_assert!(!IntentStatus::Refunded.can_transition_to(next));
    }
}

//! Coupons and discount computation.
//!
//! Validation runs before any money moves; pricing floors at zero so a
//! discount can never exceed the original amount.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use chargekit_providers::Amount;

use crate::UserId;

/// How a coupon reduces a charge.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountKind {
    /// Percentage off, 0–100.
    Percentage { rate: Decimal },
    /// Fixed amount off.
    Fixed { amount: Amount },
}

/// Why a coupon cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponError {
    #[error("coupon does not exist")]
    NotFound,
    #[error("coupon is disabled")]
    Disabled,
    #[error("coupon is not active yet")]
    NotYetActive,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon has reached its usage limit")]
    UsageLimitExceeded,
    #[error("coupon was already used by this user")]
    PerUserLimitExceeded,
    #[error("coupon is not valid for this plan")]
    NotApplicableToPlan,
    #[error("coupon is only valid for first-time purchases")]
    FirstPurchaseOnly,
    #[error("purchase does not meet the coupon minimum of {required}")]
    MinPurchaseNotMet { required: Amount },
}

/// A discount rule, bounded by a validity window and usage caps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub kind: DiscountKind,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Global cap across all users; 0 means unlimited.
    pub max_uses: u32,
    /// Cap per user; 0 means unlimited.
    pub per_user_limit: u32,
    /// Times consumed so far (all users).
    pub uses: u32,
    pub min_purchase: Option<Amount>,
    /// Plan names this coupon applies to; empty means all plans.
    pub applicable_plans: Vec<String>,
    pub first_purchase_only: bool,
    pub enabled: bool,
}

impl Coupon {
    pub fn new(code: impl Into<String>, kind: DiscountKind, valid_until: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            kind,
            valid_from: Utc::now(),
            valid_until,
            max_uses: 0,
            per_user_limit: 1,
            uses: 0,
            min_purchase: None,
            applicable_plans: Vec::new(),
            first_purchase_only: false,
            enabled: true,
        }
    }

    /// Check every redemption rule.
    ///
    /// `user_uses` is how often this user has consumed the coupon already;
    /// `user_has_paid_before` feeds the first-purchase restriction. Both are
    /// read-only snapshots here — the authoritative re-check happens inside
    /// the storage commit, where the counter increment is conditional.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        amount: Amount,
        plan: Option<&str>,
        user_uses: u32,
        user_has_paid_before: bool,
    ) -> Result<(), CouponError> {
        if !self.enabled {
            return Err(CouponError::Disabled);
        }
        if now < self.valid_from {
            return Err(CouponError::NotYetActive);
        }
        if now > self.valid_until {
            return Err(CouponError::Expired);
        }
        if self.max_uses > 0 && self.uses >= self.max_uses {
            return Err(CouponError::UsageLimitExceeded);
        }
        if self.per_user_limit > 0 && user_uses >= self.per_user_limit {
            return Err(CouponError::PerUserLimitExceeded);
        }
        if !self.applicable_plans.is_empty() {
            match plan {
                Some(p) if self.applicable_plans.iter().any(|ap| ap == p) => {}
                _ => return Err(CouponError::NotApplicableToPlan),
            }
        }
        if self.first_purchase_only && user_has_paid_before {
            return Err(CouponError::FirstPurchaseOnly);
        }
        if let Some(min) = self.min_purchase {
            if amount < min {
                return Err(CouponError::MinPurchaseNotMet { required: min });
            }
        }
        Ok(())
    }

    /// The amount taken off an original price. Never exceeds the price.
    pub fn discount_for(&self, original: Amount) -> Amount {
        let raw = match self.kind {
            DiscountKind::Percentage { rate } => original.percentage(rate),
            DiscountKind::Fixed { amount } => amount,
        };
        raw.min(original)
    }

    /// The price after discount: `max(0, original − discount)`.
    pub fn apply_to(&self, original: Amount) -> Amount {
        original.sub_floor_zero(self.discount_for(original))
    }
}

/// A coupon's recorded effect on a single charge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscountApplication {
    pub coupon_code: String,
    pub user_id: UserId,
    pub kind: DiscountKind,
    pub original_amount: Amount,
    pub amount_off: Amount,
    pub final_amount: Amount,
    pub applied_at: DateTime<Utc>,
}

impl DiscountApplication {
    pub fn new(coupon: &Coupon, user_id: UserId, original: Amount) -> Self {
        let amount_off = coupon.discount_for(original);
        Self {
            coupon_code: coupon.code.clone(),
            user_id,
            kind: coupon.kind,
            original_amount: original,
            amount_off,
            final_amount: original.sub_floor_zero(amount_off),
            applied_at: Utc::now(),
        }
    }
}

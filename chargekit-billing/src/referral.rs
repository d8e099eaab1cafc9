//! Referral codes and rewards.
//!
//! A referrer hands out a code; when a referred user signs up and makes
//! their first successful payment, the referrer earns a reward — at most
//! once per (referrer, referred) pair.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use chargekit_providers::Amount;

use crate::UserId;

/// What a successful referral earns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    /// Account credit.
    Credit,
    /// A discount coupon issued to the referrer.
    Discount,
    /// Subscription extended by one period.
    FreeMonth,
    /// A gated feature unlocked.
    FeatureUnlock,
}

/// Why a referral code cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferralError {
    #[error("referral code does not exist")]
    NotFound,
    #[error("referral code is no longer valid")]
    Disabled,
    #[error("cannot use your own referral code")]
    SelfReferral,
    #[error("user has already been referred")]
    AlreadyReferred,
}

/// A user's shareable referral code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferralCode {
    pub code: String,
    pub owner: UserId,
    pub reward_kind: RewardKind,
    pub reward_amount: Amount,
    /// Times the code has been applied; 0-cap means unlimited.
    pub uses: u32,
    pub max_uses: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ReferralCode {
    /// Mint a code for a user. Eight characters, upper-case alphanumeric,
    /// matching what support teams can read back over the phone.
    pub fn generate(owner: UserId, reward_kind: RewardKind, reward_amount: Amount) -> Self {
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();
        let code: String = (0..8)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        Self {
            code,
            owner,
            reward_kind,
            reward_amount,
            uses: 0,
            max_uses: 0,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Check the code can be applied for `new_user`.
    ///
    /// `already_referred` is whether any code was ever applied for this
    /// user; a user is referred at most once, ever.
    pub fn validate(&self, new_user: UserId, already_referred: bool) -> Result<(), ReferralError> {
        if !self.enabled {
            return Err(ReferralError::Disabled);
        }
        if self.max_uses > 0 && self.uses >= self.max_uses {
            return Err(ReferralError::Disabled);
        }
        if self.owner == new_user {
            return Err(ReferralError::SelfReferral);
        }
        if already_referred {
            return Err(ReferralError::AlreadyReferred);
        }
        Ok(())
    }
}

/// A granted referral reward. One per (referrer, referred) pair, enforced by
/// the storage layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferralReward {
    pub referrer: UserId,
    pub referred: UserId,
    pub kind: RewardKind,
    pub amount: Amount,
    pub granted_at: DateTime<Utc>,
}

impl ReferralReward {
    pub fn new(code: &ReferralCode, referred: UserId) -> Self {
        Self {
            referrer: code.owner,
            referred,
            kind: code.reward_kind,
            amount: code.reward_amount,
            granted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_for(owner: UserId) -> ReferralCode {
        ReferralCode::generate(owner, RewardKind::Credit, Amount::from_cents(1000))
    }

    #[test]
    fn generated_codes_are_eight_uppercase_chars() {
        let code = code_for(1);
        assert_eq!(code.code.len(), 8);
        assert!(code
            .code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn self_referral_is_rejected() {
        let code = code_for(7);
        assert_eq!(code.validate(7, false), Err(ReferralError::SelfReferral));
        assert!(code.validate(8, false).is_ok());
    }

    #[test]
    fn double_referral_is_rejected() {
        let code = code_for(7);
        assert_eq!(code.validate(8, true), Err(ReferralError::AlreadyReferred));
    }

    #[test]
    fn capped_code_disables_itself() {
        let mut code = code_for(7);
        code.max_uses = 2;
        code.uses = 2;
        assert_eq!(code.validate(8, false), Err(ReferralError::Disabled));
    }

    #[test]
    fn reward_copies_the_code_terms() {
        let code = code_for(7);
        let reward = ReferralReward::new(&code, 8);
        assert_eq!(reward.referrer, 7);
        assert_eq!(reward.referred, 8);
        assert_eq!(reward.kind, RewardKind::Credit);
        assert_eq!(reward.amount, Amount::from_cents(1000));
    }
}

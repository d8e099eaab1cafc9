//! # Chargekit billing workflows
//!
//! The orchestration layer on top of the provider adapters: the charge
//! workflow (coupon validation → discount → provider charge → one atomic
//! local commit), webhook-driven state reconciliation, refunds, and the
//! renewal sweep.
//!
//! ## Consistency model
//!
//! An external charge cannot join a local transaction, so the workflow
//! performs the provider call first and then persists all local state in a
//! single atomic storage unit. If that unit fails after the provider said
//! yes, the fact that money moved is durably recorded as a reconciliation
//! entry for an operator; it is never retried automatically, since retrying
//! a charge that may have succeeded risks double-billing.
//!
//! Per-intent mutation is serialized through compare-and-set status
//! transitions, so a webhook and a refund racing on the same intent cannot
//! interleave. Different intents have no ordering relationship.

pub mod coupon;
pub mod dispatcher;
pub mod intent;
pub mod orchestrator;
pub mod referral;
pub mod refund;
pub mod renewal;
pub mod storage;
pub mod subscription;

pub use coupon::{Coupon, CouponError, DiscountApplication, DiscountKind};
pub use dispatcher::{DispatchOutcome, WebhookDispatcher};
pub use intent::{IntentStatus, PaymentIntent};
pub use orchestrator::{ChargeOutcome, ChargeRequest, PaymentOrchestrator};
pub use referral::{ReferralCode, ReferralReward, RewardKind};
pub use refund::{RefundCoordinator, RefundOutcome};
pub use renewal::{RenewalOutcome, RenewalReport, RenewalSweep};
pub use storage::{
    BillingStore, ChargeCommit, MemoryBillingStore, ReconciliationKind, ReconciliationRecord,
    WebhookLogEntry,
};
pub use subscription::{
    BillingPeriod, StoreSubscriptionHooks, Subscription, SubscriptionHooks, SubscriptionStatus,
};

use chargekit_providers::{Amount, ProviderError, ProviderName};

/// Result alias for storage-internal plumbing.
pub type StorageResult<T> = anyhow::Result<T>;

/// Errors surfaced by the billing workflows.
///
/// Business-rule failures are typed so the API layer can map them to
/// user-facing messages instead of opaque transport errors.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("coupon is not valid: {0}")]
    CouponInvalid(String),

    #[error("coupon '{code}' has expired")]
    CouponExpired { code: String },

    #[error("coupon '{code}' has reached its usage limit")]
    CouponUsageLimitExceeded { code: String },

    /// The provider refused the charge. User-actionable.
    #[error("payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// No payment intent matches the given reference.
    #[error("unknown payment reference: {0}")]
    UnknownPaymentReference(String),

    #[error("payment {intent_id} is not refundable (status {status})")]
    NotRefundable {
        intent_id: uuid::Uuid,
        status: IntentStatus,
    },

    #[error("refund of {requested} exceeds remaining refundable balance {remaining}")]
    RefundExceedsCharge { requested: Amount, remaining: Amount },

    /// The provider refused the refund.
    #[error("refund declined: {reason}")]
    RefundFailed { reason: String },

    /// A reward for this (referrer, referred) pair was already granted.
    #[error("referral reward already granted for this pair")]
    AlreadyGranted,

    /// The provider accepted a charge but the local commit failed. Highest
    /// severity: the divergence is durably recorded and requires an
    /// operator, never an automatic retry.
    #[error("payment {external_ref} requires manual reconciliation: {detail}")]
    ReconciliationRequired { external_ref: String, detail: String },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl BillingError {
    /// Message safe to show an end user.
    ///
    /// Distinguishes the user-actionable cases (declined by provider,
    /// coupon problems) from internal faults, which all collapse into a
    /// generic "contact support".
    pub fn user_message(&self) -> String {
        match self {
            Self::PaymentDeclined { reason } => format!("Your payment was declined: {reason}"),
            Self::CouponInvalid(reason) => format!("This coupon cannot be used: {reason}"),
            Self::CouponExpired { .. } => "This coupon has expired.".to_string(),
            Self::CouponUsageLimitExceeded { .. } => {
                "This coupon has reached its usage limit.".to_string()
            }
            Self::RefundExceedsCharge { .. } => {
                "The requested refund exceeds the refundable balance.".to_string()
            }
            Self::NotRefundable { .. } => "This payment cannot be refunded.".to_string(),
            _ => "Something went wrong on our side — please contact support.".to_string(),
        }
    }

    /// True for failures the user can act on themselves.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::PaymentDeclined { .. }
                | Self::CouponInvalid(_)
                | Self::CouponExpired { .. }
                | Self::CouponUsageLimitExceeded { .. }
                | Self::RefundExceedsCharge { .. }
                | Self::NotRefundable { .. }
        )
    }
}

/// Identifier of a user in the host application.
pub type UserId = i64;

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        BillingError, BillingStore, ChargeOutcome, ChargeRequest, Coupon, DiscountKind,
        IntentStatus, MemoryBillingStore, PaymentIntent, PaymentOrchestrator, RefundCoordinator,
        Subscription, WebhookDispatcher,
    };
    pub use chargekit_providers::{Amount, ProviderName};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_distinguish_actionable_failures() {
        let declined = BillingError::PaymentDeclined {
            reason: "insufficient funds".into(),
        };
        assert!(declined.is_user_actionable());
        assert!(declined.user_message().contains("insufficient funds"));

        let internal = BillingError::Storage(anyhow::anyhow!("db down"));
        assert!(!internal.is_user_actionable());
        assert!(internal.user_message().contains("contact support"));
    }
}

//! The durable payment-intent record and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use chargekit_providers::{Amount, ProviderName};

use crate::UserId;

/// Lifecycle of a payment intent.
///
/// Webhook-driven edges: an intent settles (`Completed`/`Failed`) from
/// `Pending` or `Processing`, and only a completed intent can become
/// `Refunded`. Terminal failure and refund states accept no further edges;
/// redeliveries that would re-apply a reached state are deduplicated by the
/// dispatcher, not treated as transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created; the provider has not settled it.
    Pending,
    /// Confirmation submitted, awaiting the provider's verdict.
    Processing,
    /// Money moved.
    Completed,
    Failed,
    /// Fully refunded. Partial refunds keep the intent `Completed` and
    /// accumulate in [`PaymentIntent::refunded`].
    Refunded,
}

impl IntentStatus {
    /// Whether an edge from `self` to `next` is legal.
    pub fn can_transition_to(self, next: IntentStatus) -> bool {
        use IntentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        };
        write!(f, "{s}")
    }
}

/// One attempt to collect money.
///
/// Never deleted: a failed or refunded intent stays as the audit record of
/// the attempt. Mutations go through the storage layer's compare-and-set so
/// concurrent reconciliation cannot interleave.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: UserId,
    /// Optional link to a subscription (one-time purchases have none).
    pub subscription_id: Option<Uuid>,
    /// Amount actually charged, after discount.
    pub amount: Amount,
    pub currency: String,
    pub provider: ProviderName,
    pub status: IntentStatus,
    /// Provider-assigned reference; absent for zero-amount charges that
    /// never reached a provider until one is synthesized locally.
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Total refunded so far; never exceeds `amount`.
    pub refunded: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(
        user_id: UserId,
        amount: Amount,
        currency: impl Into<String>,
        provider: ProviderName,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            subscription_id: None,
            amount,
            currency: currency.into(),
            provider,
            status: IntentStatus::Pending,
            external_ref: None,
            description: None,
            metadata: HashMap::new(),
            refunded: Amount::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_subscription(mut self, subscription_id: Uuid) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_status(mut self, status: IntentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Balance still eligible for refund.
    pub fn remaining_refundable(&self) -> Amount {
        self.amount.sub_floor_zero(self.refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use IntentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Refunded));

        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Refunded.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn remaining_refundable_floors_at_zero() {
        let mut intent = PaymentIntent::new(1, Amount::from_cents(2999), "USD", ProviderName::Card);
        assert_eq!(intent.remaining_refundable(), Amount::from_cents(2999));

        intent.refunded = Amount::from_cents(2500);
        assert_eq!(intent.remaining_refundable(), Amount::from_cents(499));

        intent.refunded = Amount::from_cents(5000);
        assert_eq!(intent.remaining_refundable(), Amount::ZERO);
    }
}

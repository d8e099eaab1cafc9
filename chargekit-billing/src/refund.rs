//! Refund handling.
//!
//! Loads the intent, enforces the refundable-balance invariant, delegates to
//! the provider the intent was charged through, and records the outcome.
//! Subscription side effects (suspending access after a refund) are the
//! caller's business, invoked through [`crate::SubscriptionHooks`], not here.

use std::sync::Arc;

use uuid::Uuid;

use chargekit_providers::{Amount, PaymentManager, RefundAmount};

use crate::intent::IntentStatus;
use crate::storage::BillingStore;
use crate::BillingError;

/// Result of a processed refund.
#[derive(Clone, Debug)]
pub struct RefundOutcome {
    pub intent_id: Uuid,
    pub amount_refunded: Amount,
    /// Provider-side refund reference, when one was issued.
    pub provider_ref: Option<String>,
    /// True when the whole charge is now refunded and the intent status
    /// moved to `Refunded`.
    pub full: bool,
}

pub struct RefundCoordinator {
    manager: Arc<PaymentManager>,
    store: Arc<dyn BillingStore>,
}

impl RefundCoordinator {
    pub fn new(manager: Arc<PaymentManager>, store: Arc<dyn BillingStore>) -> Self {
        Self { manager, store }
    }

    /// Refund a completed payment, fully or partially.
    ///
    /// Fails with `NotRefundable` unless the intent is `Completed`, and
    /// with `RefundExceedsCharge` when the request exceeds the remaining
    /// refundable balance (original amount minus refunds already recorded).
    pub async fn refund(
        &self,
        intent_id: Uuid,
        request: RefundAmount,
    ) -> Result<RefundOutcome, BillingError> {
        let Some(intent) = self.store.intent(intent_id).await? else {
            return Err(BillingError::UnknownPaymentReference(intent_id.to_string()));
        };

        if intent.status != IntentStatus::Completed {
            return Err(BillingError::NotRefundable {
                intent_id,
                status: intent.status,
            });
        }

        let remaining = intent.remaining_refundable();
        let amount = match request {
            RefundAmount::Full => remaining,
            RefundAmount::Partial(amount) => amount,
        };
        if amount > remaining {
            return Err(BillingError::RefundExceedsCharge {
                requested: amount,
                remaining,
            });
        }
        let full = amount == remaining;

        // Zero-amount charges (and zero-value full refunds) have nothing at
        // a provider to refund; only the bookkeeping changes.
        if amount.is_zero() || intent.external_ref.is_none() {
            self.store.record_refund(intent_id, amount, full).await?;
            return Ok(RefundOutcome {
                intent_id,
                amount_refunded: amount,
                provider_ref: None,
                full,
            });
        }
        let external_ref = intent.external_ref.clone().unwrap_or_default();

        // Capability gaps (Unsupported) and configuration problems stay
        // typed; a declined refund becomes RefundFailed.
        let result = self
            .manager
            .refund_payment(intent.provider, &external_ref, request)
            .await?;

        if !result.success {
            return Err(BillingError::RefundFailed {
                reason: result
                    .reason
                    .unwrap_or_else(|| "refund declined by provider".to_string()),
            });
        }

        self.store.record_refund(intent_id, amount, full).await?;

        tracing::info!(
            intent_id = %intent_id,
            provider = %intent.provider,
            amount = %amount,
            full,
            "refund recorded"
        );

        Ok(RefundOutcome {
            intent_id,
            amount_refunded: amount,
            provider_ref: result.external_ref,
            full,
        })
    }
}

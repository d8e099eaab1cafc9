//! Subscription renewal sweep.
//!
//! The periodic schedule lives outside this crate; an external scheduler
//! calls [`RenewalSweep::run_once`] (or [`RenewalSweep::renew`] per item).
//! Every invocation is idempotent: a renewal is keyed by the subscription's
//! current period end, so a redelivered invocation that finds the period
//! already charged is a no-op.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::intent::IntentStatus;
use crate::orchestrator::{ChargeRequest, PaymentOrchestrator};
use crate::storage::{BillingStore, RENEWAL_PERIOD_KEY};
use crate::subscription::{Subscription, SubscriptionHooks};
use crate::BillingError;

/// Result of renewing one subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// Charge settled synchronously; the period was extended.
    Renewed { intent_id: Uuid },
    /// Charge accepted but not settled; the invoice webhook will extend the
    /// period when it lands.
    PendingSettlement { intent_id: Uuid },
    /// Nothing to do (not active, auto-renew off, or already charged for
    /// this period).
    Skipped { reason: String },
    /// The provider declined; the subscription was suspended.
    Failed { reason: String },
}

/// Tally of one sweep invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenewalReport {
    pub renewed: usize,
    pub pending: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct RenewalSweep {
    store: Arc<dyn BillingStore>,
    orchestrator: Arc<PaymentOrchestrator>,
    hooks: Arc<dyn SubscriptionHooks>,
}

impl RenewalSweep {
    pub fn new(
        store: Arc<dyn BillingStore>,
        orchestrator: Arc<PaymentOrchestrator>,
        hooks: Arc<dyn SubscriptionHooks>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            hooks,
        }
    }

    /// Active, auto-renewing subscriptions whose period ends within `window`.
    pub async fn due_for_renewal(
        &self,
        window: Duration,
    ) -> Result<Vec<Subscription>, BillingError> {
        Ok(self
            .store
            .subscriptions_due_for_renewal(Utc::now() + window)
            .await?)
    }

    /// Renew every due subscription, tolerating per-item failures.
    pub async fn run_once(&self, window: Duration) -> Result<RenewalReport, BillingError> {
        let due = self.due_for_renewal(window).await?;
        let mut report = RenewalReport::default();

        for sub in due {
            match self.renew(sub.id).await {
                Ok(RenewalOutcome::Renewed { .. }) => report.renewed += 1,
                Ok(RenewalOutcome::PendingSettlement { .. }) => report.pending += 1,
                Ok(RenewalOutcome::Skipped { .. }) => report.skipped += 1,
                Ok(RenewalOutcome::Failed { .. }) => report.failed += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(subscription_id = %sub.id, error = %err, "renewal errored");
                }
            }
        }

        tracing::info!(
            renewed = report.renewed,
            pending = report.pending,
            skipped = report.skipped,
            failed = report.failed,
            "renewal sweep complete"
        );
        Ok(report)
    }

    /// Renew one subscription. Safe to call twice for the same period.
    pub async fn renew(&self, subscription_id: Uuid) -> Result<RenewalOutcome, BillingError> {
        let Some(sub) = self.store.subscription(subscription_id).await? else {
            return Err(BillingError::Storage(anyhow::anyhow!(
                "subscription {subscription_id} not found"
            )));
        };

        if !sub.is_active() || !sub.auto_renew {
            return Ok(RenewalOutcome::Skipped {
                reason: "subscription is not auto-renewing".to_string(),
            });
        }

        if self
            .store
            .renewal_intent_exists(sub.id, sub.current_period_end)
            .await?
        {
            return Ok(RenewalOutcome::Skipped {
                reason: "period already charged".to_string(),
            });
        }

        let request = ChargeRequest::new(sub.user_id, sub.amount, sub.currency.clone())
            .with_provider(sub.provider)
            .with_subscription(sub.id)
            .with_description(format!("Renewal: {}", sub.plan))
            .with_metadata(RENEWAL_PERIOD_KEY, sub.current_period_end.to_rfc3339());

        match self.orchestrator.charge(request).await {
            Ok(outcome) if outcome.status == IntentStatus::Completed => {
                self.hooks.mark_renewed(sub.id, outcome.intent_id).await?;
                Ok(RenewalOutcome::Renewed {
                    intent_id: outcome.intent_id,
                })
            }
            Ok(outcome) => Ok(RenewalOutcome::PendingSettlement {
                intent_id: outcome.intent_id,
            }),
            Err(BillingError::PaymentDeclined { reason }) => {
                self.hooks.mark_suspended(sub.id, &reason).await?;
                Ok(RenewalOutcome::Failed { reason })
            }
            Err(err) => Err(err),
        }
    }
}

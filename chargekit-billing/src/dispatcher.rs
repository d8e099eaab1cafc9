//! Webhook-driven state reconciliation.
//!
//! The dispatcher receives raw provider deliveries, has the owning adapter
//! verify and canonicalize them, and drives the intent status machine.
//! Providers are allowed to redeliver: applying the same (reference, kind)
//! twice is a no-op the second time, derived from the intent's current
//! status rather than any delivery bookkeeping. Events referencing unknown
//! payments never create intents; they land in the operator queue.

use std::sync::Arc;

use chargekit_providers::{EventKind, PaymentManager, ProviderError, ProviderName, WebhookEvent};

use crate::intent::{IntentStatus, PaymentIntent};
use crate::storage::{
    BillingStore, ReconciliationKind, ReconciliationRecord, WebhookLogEntry,
};
use crate::subscription::SubscriptionHooks;
use crate::BillingError;

/// What reconciliation did with a verified delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// State was changed.
    Applied,
    /// Redelivery of an already-applied event; nothing changed.
    Deduplicated,
    /// Verified but carrying no local action (unrecognized kind, lifecycle
    /// notice with no record to touch).
    Ignored,
    /// Contradicts local state; parked for an operator, nothing changed.
    QueuedForReview,
}

pub struct WebhookDispatcher {
    manager: Arc<PaymentManager>,
    store: Arc<dyn BillingStore>,
    subscriptions: Arc<dyn SubscriptionHooks>,
}

impl WebhookDispatcher {
    pub fn new(
        manager: Arc<PaymentManager>,
        store: Arc<dyn BillingStore>,
        subscriptions: Arc<dyn SubscriptionHooks>,
    ) -> Self {
        Self {
            manager,
            store,
            subscriptions,
        }
    }

    /// Verify and reconcile one inbound delivery.
    ///
    /// Error mapping for the HTTP layer: `SignatureInvalid` must become a
    /// non-2xx response (a spoofable endpoint must not look healthy);
    /// everything else — including `UnknownPaymentReference`, which is
    /// already parked for review — should still be acked so the provider
    /// stops redelivering.
    pub async fn handle_webhook(
        &self,
        provider: ProviderName,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<DispatchOutcome, BillingError> {
        let event = match self.manager.parse_webhook(provider, raw_body, signature_header) {
            Ok(event) => event,
            Err(ProviderError::UnrecognizedEvent(kind)) => {
                tracing::info!(provider = %provider, kind = %kind, "unrecognized webhook event, ignoring");
                return Ok(DispatchOutcome::Ignored);
            }
            Err(err) => return Err(err.into()),
        };

        let outcome = self.dispatch(&event).await?;

        self.store
            .log_webhook(WebhookLogEntry {
                provider: event.provider,
                kind: event.kind,
                external_ref: event.external_ref.clone(),
                outcome: format!("{outcome:?}").to_lowercase(),
                received_at: event.received_at,
            })
            .await?;

        Ok(outcome)
    }

    /// Route a canonical event through the status machine.
    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<DispatchOutcome, BillingError> {
        match event.kind {
            EventKind::ChargeSucceeded => self.settle(event, /*renewal=*/ false).await,
            EventKind::InvoicePaid => self.settle(event, /*renewal=*/ true).await,
            EventKind::ChargeFailed => self.fail(event, /*suspend=*/ false).await,
            EventKind::InvoiceFailed => self.fail(event, /*suspend=*/ true).await,
            EventKind::RefundCompleted => self.refund_completed(event).await,
            EventKind::RefundFailed => self.refund_failed(event).await,
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
                tracing::info!(
                    provider = %event.provider,
                    kind = %event.kind,
                    external_ref = %event.external_ref,
                    "subscription lifecycle notice"
                );
                Ok(DispatchOutcome::Ignored)
            }
            EventKind::SubscriptionCancelled => self.subscription_cancelled(event).await,
        }
    }

    async fn require_intent(&self, event: &WebhookEvent) -> Result<PaymentIntent, BillingError> {
        match self.store.intent_by_external_ref(&event.external_ref).await? {
            Some(intent) => Ok(intent),
            None => {
                tracing::warn!(
                    provider = %event.provider,
                    kind = %event.kind,
                    external_ref = %event.external_ref,
                    "webhook references unknown payment, queued for review"
                );
                self.store
                    .record_reconciliation(ReconciliationRecord::new(
                        ReconciliationKind::UnknownReference,
                        event.provider,
                        event.external_ref.clone(),
                        format!("{} event for unknown reference", event.kind),
                    ))
                    .await?;
                Err(BillingError::UnknownPaymentReference(
                    event.external_ref.clone(),
                ))
            }
        }
    }

    async fn queue_conflict(
        &self,
        event: &WebhookEvent,
        intent: &PaymentIntent,
    ) -> Result<DispatchOutcome, BillingError> {
        tracing::warn!(
            intent_id = %intent.id,
            status = %intent.status,
            kind = %event.kind,
            "webhook conflicts with intent state, queued for review"
        );
        self.store
            .record_reconciliation(ReconciliationRecord::new(
                ReconciliationKind::ConflictingEvent,
                event.provider,
                event.external_ref.clone(),
                format!("{} event while intent is {}", event.kind, intent.status),
            ))
            .await?;
        Ok(DispatchOutcome::QueuedForReview)
    }

    /// charge-succeeded / invoice-paid: settle the intent. The CAS picks
    /// exactly one winner under concurrent redelivery; side effects (renewal
    /// hooks) only run on the winning application.
    async fn settle(
        &self,
        event: &WebhookEvent,
        renewal: bool,
    ) -> Result<DispatchOutcome, BillingError> {
        let intent = self.require_intent(event).await?;

        let from = match intent.status {
            IntentStatus::Completed | IntentStatus::Refunded => {
                return Ok(DispatchOutcome::Deduplicated)
            }
            IntentStatus::Pending => IntentStatus::Pending,
            IntentStatus::Processing => IntentStatus::Processing,
            IntentStatus::Failed => return self.queue_conflict(event, &intent).await,
        };

        let applied = self
            .store
            .transition_intent(intent.id, from, IntentStatus::Completed)
            .await?;
        if !applied {
            // Lost the race; whatever won decides the state now.
            return Ok(DispatchOutcome::Deduplicated);
        }

        tracing::info!(
            intent_id = %intent.id,
            external_ref = %event.external_ref,
            "payment completed via webhook"
        );

        if renewal {
            if let Some(subscription_id) = intent.subscription_id {
                self.subscriptions
                    .mark_renewed(subscription_id, intent.id)
                    .await?;
            }
        }

        Ok(DispatchOutcome::Applied)
    }

    /// charge-failed / invoice-failed: fail the intent, optionally
    /// suspending the linked subscription.
    async fn fail(
        &self,
        event: &WebhookEvent,
        suspend: bool,
    ) -> Result<DispatchOutcome, BillingError> {
        let intent = self.require_intent(event).await?;

        let from = match intent.status {
            IntentStatus::Failed => return Ok(DispatchOutcome::Deduplicated),
            IntentStatus::Pending => IntentStatus::Pending,
            IntentStatus::Processing => IntentStatus::Processing,
            // A failure notice for money we saw settle is operator material.
            IntentStatus::Completed | IntentStatus::Refunded => {
                return self.queue_conflict(event, &intent).await
            }
        };

        let applied = self
            .store
            .transition_intent(intent.id, from, IntentStatus::Failed)
            .await?;
        if !applied {
            return Ok(DispatchOutcome::Deduplicated);
        }

        tracing::warn!(
            intent_id = %intent.id,
            external_ref = %event.external_ref,
            "payment failed via webhook"
        );

        if suspend {
            if let Some(subscription_id) = intent.subscription_id {
                self.subscriptions
                    .mark_suspended(subscription_id, "invoice payment failed")
                    .await?;
            }
        }

        Ok(DispatchOutcome::Applied)
    }

    /// refund-completed: a provider-side refund (store revocation, returned
    /// wire). Marks the remaining balance refunded.
    async fn refund_completed(&self, event: &WebhookEvent) -> Result<DispatchOutcome, BillingError> {
        let intent = self.require_intent(event).await?;

        match intent.status {
            IntentStatus::Refunded => Ok(DispatchOutcome::Deduplicated),
            IntentStatus::Completed => {
                self.store
                    .record_refund(intent.id, intent.remaining_refundable(), true)
                    .await?;
                tracing::info!(
                    intent_id = %intent.id,
                    external_ref = %event.external_ref,
                    "payment refunded via webhook"
                );
                Ok(DispatchOutcome::Applied)
            }
            // Refund notice for money that never settled here.
            _ => self.queue_conflict(event, &intent).await,
        }
    }

    async fn refund_failed(&self, event: &WebhookEvent) -> Result<DispatchOutcome, BillingError> {
        let intent = self.require_intent(event).await?;
        if intent.status == IntentStatus::Refunded {
            // We recorded a refund the provider now says failed.
            return self.queue_conflict(event, &intent).await;
        }
        tracing::warn!(
            intent_id = %intent.id,
            external_ref = %event.external_ref,
            "provider reports refund failure"
        );
        Ok(DispatchOutcome::Ignored)
    }

    async fn subscription_cancelled(
        &self,
        event: &WebhookEvent,
    ) -> Result<DispatchOutcome, BillingError> {
        // Cancellation notices reference the provider's subscription object;
        // resolve it through the local record if one is linked.
        match self
            .store
            .subscription_by_external_ref(&event.external_ref)
            .await?
        {
            Some(sub) => {
                self.subscriptions.mark_cancelled(sub.id).await?;
                Ok(DispatchOutcome::Applied)
            }
            None => {
                tracing::info!(
                    external_ref = %event.external_ref,
                    "cancellation notice with no local subscription"
                );
                Ok(DispatchOutcome::Ignored)
            }
        }
    }
}

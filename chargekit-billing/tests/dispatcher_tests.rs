//! Webhook reconciliation tests: idempotent redelivery, out-of-order
//! events, signature rejection, and subscription side effects.

use std::sync::Arc;

use serde_json::json;

use chargekit_billing::{
    BillingError, BillingStore, DispatchOutcome, IntentStatus, MemoryBillingStore,
    PaymentIntent, ReconciliationKind, StoreSubscriptionHooks, Subscription, SubscriptionStatus,
    WebhookDispatcher,
};
use chargekit_billing::BillingPeriod;
use chargekit_providers::config::CardConfig;
use chargekit_providers::test_utils::MockGateway;
use chargekit_providers::{
    signature, Amount, PaymentManager, ProviderError, ProviderName, ProviderRegistry,
    ProvidersConfig,
};

const WEBHOOK_SECRET: &str = "whsec_test";

fn setup() -> (WebhookDispatcher, Arc<MemoryBillingStore>) {
    let config = ProvidersConfig {
        default_provider: Some(ProviderName::Card),
        card: Some(CardConfig::new("sk_test", WEBHOOK_SECRET)),
        ..ProvidersConfig::default()
    };
    let registry = Arc::new(ProviderRegistry::from_config(
        config,
        Arc::new(MockGateway::new()),
    ));
    let manager = Arc::new(PaymentManager::new(registry));
    let store = Arc::new(MemoryBillingStore::new());
    let hooks = Arc::new(StoreSubscriptionHooks::new(
        store.clone() as Arc<dyn BillingStore>
    ));
    let dispatcher = WebhookDispatcher::new(manager, store.clone() as Arc<dyn BillingStore>, hooks);
    (dispatcher, store)
}

fn signed(body: &[u8]) -> String {
    signature::sign(body, chrono::Utc::now().timestamp(), WEBHOOK_SECRET).unwrap()
}

fn charge_succeeded_body(reference: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": reference}}
    }))
    .unwrap()
}

async fn seed_intent(
    store: &MemoryBillingStore,
    reference: &str,
    status: IntentStatus,
) -> PaymentIntent {
    let intent = PaymentIntent::new(1, Amount::from_cents(2999), "USD", ProviderName::Card)
        .with_external_ref(reference)
        .with_status(status);
    store.insert_intent(&intent).await.unwrap();
    intent
}

#[tokio::test]
async fn pending_intent_completes_on_charge_succeeded() {
    let (dispatcher, store) = setup();
    let intent = seed_intent(&store, "pi_1", IntentStatus::Pending).await;

    let body = charge_succeeded_body("pi_1");
    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Applied);
    let loaded = store.intent(intent.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, IntentStatus::Completed);
}

#[tokio::test]
async fn redelivery_is_a_silent_no_op() {
    let (dispatcher, store) = setup();
    let intent = seed_intent(&store, "pi_1", IntentStatus::Pending).await;
    let body = charge_succeeded_body("pi_1");

    let first = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();
    let second = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(first, DispatchOutcome::Applied);
    assert_eq!(second, DispatchOutcome::Deduplicated);
    let loaded = store.intent(intent.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, IntentStatus::Completed);

    // Both deliveries are in the trace
    let log = store.webhook_log().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].outcome, "applied");
    assert_eq!(log[1].outcome, "deduplicated");
}

#[tokio::test]
async fn charge_succeeded_for_already_completed_intent_deduplicates() {
    let (dispatcher, store) = setup();
    seed_intent(&store, "pi_done", IntentStatus::Completed).await;
    let body = charge_succeeded_body("pi_done");

    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Deduplicated);
}

#[tokio::test]
async fn bad_signature_is_an_error_not_an_ack() {
    let (dispatcher, _) = setup();
    let body = charge_succeeded_body("pi_1");

    let err = dispatcher
        .handle_webhook(ProviderName::Card, &body, "t=1,v1=deadbeef")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BillingError::Provider(ProviderError::SignatureInvalid)
    ));
}

#[tokio::test]
async fn unrecognized_event_kind_is_acked_and_ignored() {
    let (dispatcher, _) = setup();
    let body = serde_json::to_vec(&json!({
        "type": "account.updated",
        "data": {"object": {"id": "acct_1"}}
    }))
    .unwrap();

    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Ignored);
}

#[tokio::test]
async fn refund_event_before_any_charge_is_queued_for_review() {
    let (dispatcher, store) = setup();
    let body = serde_json::to_vec(&json!({
        "type": "charge.refunded",
        "data": {"object": {"id": "ch_x", "payment_intent": "pi_never_seen"}}
    }))
    .unwrap();

    let err = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::UnknownPaymentReference(_)));

    // No intent was fabricated from the refund event
    assert!(store
        .intent_by_external_ref("pi_never_seen")
        .await
        .unwrap()
        .is_none());
    let queue = store.pending_reconciliations().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].kind, ReconciliationKind::UnknownReference);
}

#[tokio::test]
async fn refund_event_on_completed_intent_marks_it_refunded() {
    let (dispatcher, store) = setup();
    let intent = seed_intent(&store, "pi_paid", IntentStatus::Completed).await;
    let body = serde_json::to_vec(&json!({
        "type": "charge.refunded",
        "data": {"object": {"id": "ch_1", "payment_intent": "pi_paid"}}
    }))
    .unwrap();

    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Applied);
    let loaded = store.intent(intent.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, IntentStatus::Refunded);
    assert_eq!(loaded.refunded, Amount::from_cents(2999));
}

#[tokio::test]
async fn failure_event_after_completion_conflicts() {
    let (dispatcher, store) = setup();
    let intent = seed_intent(&store, "pi_done", IntentStatus::Completed).await;
    let body = serde_json::to_vec(&json!({
        "type": "payment_intent.payment_failed",
        "data": {"object": {"id": "pi_done"}}
    }))
    .unwrap();

    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::QueuedForReview);
    // State untouched
    let loaded = store.intent(intent.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, IntentStatus::Completed);
    assert_eq!(
        store.pending_reconciliations().await.unwrap()[0].kind,
        ReconciliationKind::ConflictingEvent
    );
}

#[tokio::test]
async fn invoice_paid_extends_the_linked_subscription() {
    let (dispatcher, store) = setup();

    let sub = Subscription::new(
        1,
        "pro",
        Amount::from_cents(2999),
        "USD",
        ProviderName::Card,
        BillingPeriod::Monthly,
    );
    store.upsert_subscription(&sub).await.unwrap();
    let old_period_end = sub.current_period_end;

    let intent = PaymentIntent::new(1, Amount::from_cents(2999), "USD", ProviderName::Card)
        .with_external_ref("pi_renewal")
        .with_subscription(sub.id);
    store.insert_intent(&intent).await.unwrap();

    let body = serde_json::to_vec(&json!({
        "type": "invoice.paid",
        "data": {"object": {"id": "in_1", "payment_intent": "pi_renewal"}}
    }))
    .unwrap();

    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Applied);
    let loaded = store.subscription(sub.id).await.unwrap().unwrap();
    assert!(loaded.current_period_end > old_period_end);
    assert_eq!(loaded.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn invoice_failed_suspends_the_linked_subscription() {
    let (dispatcher, store) = setup();

    let sub = Subscription::new(
        1,
        "pro",
        Amount::from_cents(2999),
        "USD",
        ProviderName::Card,
        BillingPeriod::Monthly,
    );
    store.upsert_subscription(&sub).await.unwrap();

    let intent = PaymentIntent::new(1, Amount::from_cents(2999), "USD", ProviderName::Card)
        .with_external_ref("pi_renewal")
        .with_subscription(sub.id);
    store.insert_intent(&intent).await.unwrap();

    let body = serde_json::to_vec(&json!({
        "type": "invoice.payment_failed",
        "data": {"object": {"id": "in_1", "payment_intent": "pi_renewal"}}
    }))
    .unwrap();

    dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    let loaded = store.subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SubscriptionStatus::Suspended);
}

#[tokio::test]
async fn cancellation_notice_cancels_the_local_subscription() {
    let (dispatcher, store) = setup();

    let mut sub = Subscription::new(
        1,
        "pro",
        Amount::from_cents(2999),
        "USD",
        ProviderName::Card,
        BillingPeriod::Monthly,
    );
    sub.external_ref = Some("sub_provider_1".to_string());
    store.upsert_subscription(&sub).await.unwrap();

    let body = serde_json::to_vec(&json!({
        "type": "customer.subscription.deleted",
        "data": {"object": {"id": "sub_provider_1"}}
    }))
    .unwrap();

    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Applied);
    let loaded = store.subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SubscriptionStatus::Cancelled);
    assert!(!loaded.auto_renew);
}

#[tokio::test]
async fn invoice_redelivery_does_not_extend_the_period_twice() {
    let (dispatcher, store) = setup();

    let sub = Subscription::new(
        1,
        "pro",
        Amount::from_cents(2999),
        "USD",
        ProviderName::Card,
        BillingPeriod::Monthly,
    );
    store.upsert_subscription(&sub).await.unwrap();

    let intent = PaymentIntent::new(1, Amount::from_cents(2999), "USD", ProviderName::Card)
        .with_external_ref("pi_renewal")
        .with_subscription(sub.id);
    store.insert_intent(&intent).await.unwrap();

    let body = serde_json::to_vec(&json!({
        "type": "invoice.paid",
        "data": {"object": {"id": "in_1", "payment_intent": "pi_renewal"}}
    }))
    .unwrap();

    dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();
    let after_first = store
        .subscription(sub.id)
        .await
        .unwrap()
        .unwrap()
        .current_period_end;

    let outcome = dispatcher
        .handle_webhook(ProviderName::Card, &body, &signed(&body))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Deduplicated);

    let after_second = store
        .subscription(sub.id)
        .await
        .unwrap()
        .unwrap()
        .current_period_end;
    assert_eq!(after_first, after_second);
}

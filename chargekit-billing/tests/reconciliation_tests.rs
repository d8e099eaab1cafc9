//! The highest-severity path: the provider accepts a charge and the local
//! commit then fails. The divergence must be durably recorded and surfaced,
//! never silently swallowed or retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use chargekit_billing::{
    BillingError, BillingStore, ChargeCommit, ChargeRequest, Coupon, IntentStatus,
    MemoryBillingStore, PaymentIntent, PaymentOrchestrator, ReconciliationKind,
    ReconciliationRecord, ReferralCode, ReferralReward, Subscription, WebhookLogEntry,
};
use chargekit_billing::storage::CommitReport;
use chargekit_providers::config::CardConfig;
use chargekit_providers::test_utils::MockGateway;
use chargekit_providers::{
    Amount, PaymentManager, ProviderName, ProviderRegistry, ProvidersConfig,
};

/// Store wrapper whose commit unit can be made to fail, with every other
/// operation delegated to the in-memory store.
struct CommitFailStore {
    inner: MemoryBillingStore,
    fail_commit: AtomicBool,
}

impl CommitFailStore {
    fn new() -> Self {
        Self {
            inner: MemoryBillingStore::new(),
            fail_commit: AtomicBool::new(false),
        }
    }

    fn fail_next_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BillingStore for CommitFailStore {
    async fn insert_intent(&self, intent: &PaymentIntent) -> anyhow::Result<()> {
        self.inner.insert_intent(intent).await
    }
    async fn intent(&self, id: Uuid) -> anyhow::Result<Option<PaymentIntent>> {
        self.inner.intent(id).await
    }
    async fn intent_by_external_ref(
        &self,
        external_ref: &str,
    ) -> anyhow::Result<Option<PaymentIntent>> {
        self.inner.intent_by_external_ref(external_ref).await
    }
    async fn transition_intent(
        &self,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
    ) -> anyhow::Result<bool> {
        self.inner.transition_intent(id, from, to).await
    }
    async fn record_refund(&self, id: Uuid, amount: Amount, full: bool) -> anyhow::Result<()> {
        self.inner.record_refund(id, amount, full).await
    }
    async fn has_completed_payment(&self, user: i64) -> anyhow::Result<bool> {
        self.inner.has_completed_payment(user).await
    }
    async fn upsert_coupon(&self, coupon: &Coupon) -> anyhow::Result<()> {
        self.inner.upsert_coupon(coupon).await
    }
    async fn coupon(&self, code: &str) -> anyhow::Result<Option<Coupon>> {
        self.inner.coupon(code).await
    }
    async fn coupon_uses_by_user(&self, code: &str, user: i64) -> anyhow::Result<u32> {
        self.inner.coupon_uses_by_user(code, user).await
    }
    async fn upsert_referral_code(&self, code: &ReferralCode) -> anyhow::Result<()> {
        self.inner.upsert_referral_code(code).await
    }
    async fn referral_code(&self, code: &str) -> anyhow::Result<Option<ReferralCode>> {
        self.inner.referral_code(code).await
    }
    async fn is_referred(&self, user: i64) -> anyhow::Result<bool> {
        self.inner.is_referred(user).await
    }
    async fn record_referral(&self, code: &str, referred: i64) -> anyhow::Result<()> {
        self.inner.record_referral(code, referred).await
    }
    async fn rewards_for(&self, referrer: i64) -> anyhow::Result<Vec<ReferralReward>> {
        self.inner.rewards_for(referrer).await
    }
    async fn commit_charge(&self, commit: ChargeCommit) -> anyhow::Result<CommitReport> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            anyhow::bail!("simulated storage outage during commit");
        }
        self.inner.commit_charge(commit).await
    }
    async fn upsert_subscription(&self, sub: &Subscription) -> anyhow::Result<()> {
        self.inner.upsert_subscription(sub).await
    }
    async fn subscription(&self, id: Uuid) -> anyhow::Result<Option<Subscription>> {
        self.inner.subscription(id).await
    }
    async fn subscription_by_external_ref(
        &self,
        external_ref: &str,
    ) -> anyhow::Result<Option<Subscription>> {
        self.inner.subscription_by_external_ref(external_ref).await
    }
    async fn subscriptions_due_for_renewal(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Subscription>> {
        self.inner.subscriptions_due_for_renewal(before).await
    }
    async fn renewal_intent_exists(
        &self,
        subscription_id: Uuid,
        period_end: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.inner
            .renewal_intent_exists(subscription_id, period_end)
            .await
    }
    async fn record_reconciliation(&self, record: ReconciliationRecord) -> anyhow::Result<()> {
        self.inner.record_reconciliation(record).await
    }
    async fn pending_reconciliations(&self) -> anyhow::Result<Vec<ReconciliationRecord>> {
        self.inner.pending_reconciliations().await
    }
    async fn log_webhook(&self, entry: WebhookLogEntry) -> anyhow::Result<()> {
        self.inner.log_webhook(entry).await
    }
    async fn webhook_log(&self) -> anyhow::Result<Vec<WebhookLogEntry>> {
        self.inner.webhook_log().await
    }
}

fn setup(store: Arc<CommitFailStore>) -> (PaymentOrchestrator, MockGateway) {
    let gateway = MockGateway::new();
    let config = ProvidersConfig {
        default_provider: Some(ProviderName::Card),
        card: Some(CardConfig::new("sk_test", "whsec_test")),
        ..ProvidersConfig::default()
    };
    let registry = Arc::new(ProviderRegistry::from_config(
        config,
        Arc::new(gateway.clone()),
    ));
    let manager = Arc::new(PaymentManager::new(registry));
    (
        PaymentOrchestrator::new(manager, store as Arc<dyn BillingStore>),
        gateway,
    )
}

#[tokio::test]
async fn commit_failure_after_external_success_is_durably_recorded() {
    let store = Arc::new(CommitFailStore::new());
    let (orchestrator, gateway) = setup(store.clone());
    gateway.stub(
        "/v1/payment_intents",
        json!({"id": "pi_money_moved", "status": "succeeded"}),
    );
    store.fail_next_commit();

    let err = orchestrator
        .charge(ChargeRequest::new(1, Amount::from_cents(2999), "USD"))
        .await
        .unwrap_err();

    // The caller learns this needs an operator, with the provider reference
    match &err {
        BillingError::ReconciliationRequired { external_ref, .. } => {
            assert_eq!(external_ref, "pi_money_moved");
        }
        other => panic!("expected ReconciliationRequired, got {other:?}"),
    }
    assert!(!err.is_user_actionable());

    // The divergence is in the operator queue
    let queue = store.pending_reconciliations().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].kind, ReconciliationKind::LocalCommitFailed);
    assert_eq!(queue[0].external_ref, "pi_money_moved");
    assert_eq!(queue[0].provider, ProviderName::Card);
}

#[tokio::test]
async fn later_charges_are_unaffected_by_a_recorded_divergence() {
    let store = Arc::new(CommitFailStore::new());
    let (orchestrator, gateway) = setup(store.clone());
    gateway.stub(
        "/v1/payment_intents",
        json!({"id": "pi_ok", "status": "succeeded"}),
    );
    store.fail_next_commit();

    let _ = orchestrator
        .charge(ChargeRequest::new(1, Amount::from_cents(2999), "USD"))
        .await
        .unwrap_err();

    // The failure mode is not sticky; the next charge lands normally
    let outcome = orchestrator
        .charge(ChargeRequest::new(1, Amount::from_cents(2999), "USD"))
        .await
        .unwrap();
    assert_eq!(outcome.status, IntentStatus::Completed);
    assert_eq!(store.pending_reconciliations().await.unwrap().len(), 1);
}

//! Billing storage abstraction.
//!
//! The persistence collaborator behind the workflows. The one contract that
//! matters: [`BillingStore::commit_charge`] is a single atomic unit — intent
//! insert, coupon usage increment, and referral reward grant become visible
//! together or not at all — and the coupon counter increment re-checks its
//! caps inside that unit, so two racing applications cannot both squeeze
//! past a `usage < limit` read.
//!
//! [`MemoryBillingStore`] is the reference implementation used by the test
//! suite; a SQL-backed implementation belongs to the host application.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chargekit_providers::{Amount, EventKind, ProviderName};

use crate::coupon::{Coupon, DiscountApplication};
use crate::intent::{IntentStatus, PaymentIntent};
use crate::referral::{ReferralCode, ReferralReward};
use crate::subscription::{Subscription, SubscriptionStatus};
use crate::{StorageResult, UserId};

/// Why an entry landed in the operator reconciliation queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationKind {
    /// Provider accepted a charge but the local commit failed. Money moved;
    /// local books do not show it.
    LocalCommitFailed,
    /// A webhook referenced a payment this system has no record of.
    UnknownReference,
    /// A webhook arrived that contradicts the intent's current state.
    ConflictingEvent,
}

/// Durable operator-queue entry. Append-only; nothing in this crate retries
/// or deletes these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub kind: ReconciliationKind,
    pub provider: ProviderName,
    pub external_ref: String,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    pub fn new(
        kind: ReconciliationKind,
        provider: ProviderName,
        external_ref: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            provider,
            external_ref: external_ref.into(),
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only trace of each accepted webhook delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookLogEntry {
    pub provider: ProviderName,
    pub kind: EventKind,
    pub external_ref: String,
    /// What reconciliation did with it ("applied", "deduplicated", ...).
    pub outcome: String,
    pub received_at: DateTime<Utc>,
}

/// The atomic unit persisted after a successful (or zero-amount) charge.
#[derive(Clone, Debug)]
pub struct ChargeCommit {
    pub intent: PaymentIntent,
    pub discount: Option<DiscountApplication>,
    pub reward: Option<ReferralReward>,
}

/// What the commit actually did.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitReport {
    /// False when the reward was skipped because the (referrer, referred)
    /// pair was already rewarded.
    pub reward_granted: bool,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Payment intents
    async fn insert_intent(&self, intent: &PaymentIntent) -> StorageResult<()>;
    async fn intent(&self, id: Uuid) -> StorageResult<Option<PaymentIntent>>;
    async fn intent_by_external_ref(&self, external_ref: &str)
        -> StorageResult<Option<PaymentIntent>>;

    /// Compare-and-set status transition.
    ///
    /// Returns `true` when the intent was in `from` and is now in `to`;
    /// `false` when its current status is anything else. This is the
    /// serialization point for concurrent reconciliation: exactly one of
    /// two racing transitions wins.
    async fn transition_intent(
        &self,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
    ) -> StorageResult<bool>;

    /// Record a refund against a completed intent. A full refund moves the
    /// status to `Refunded`; a partial one only accumulates.
    async fn record_refund(&self, id: Uuid, amount: Amount, full: bool) -> StorageResult<()>;

    /// Whether the user has any completed payment (first-purchase checks).
    async fn has_completed_payment(&self, user: UserId) -> StorageResult<bool>;

    // Coupons
    async fn upsert_coupon(&self, coupon: &Coupon) -> StorageResult<()>;
    async fn coupon(&self, code: &str) -> StorageResult<Option<Coupon>>;
    async fn coupon_uses_by_user(&self, code: &str, user: UserId) -> StorageResult<u32>;

    // Referrals
    async fn upsert_referral_code(&self, code: &ReferralCode) -> StorageResult<()>;
    async fn referral_code(&self, code: &str) -> StorageResult<Option<ReferralCode>>;
    /// Whether any referral was ever applied for this user.
    async fn is_referred(&self, user: UserId) -> StorageResult<bool>;
    /// Record that `referred` signed up through `code` and bump its counter.
    async fn record_referral(&self, code: &str, referred: UserId) -> StorageResult<()>;
    async fn rewards_for(&self, referrer: UserId) -> StorageResult<Vec<ReferralReward>>;

    /// The atomic commit unit; see the module docs.
    async fn commit_charge(&self, commit: ChargeCommit) -> StorageResult<CommitReport>;

    // Subscriptions
    async fn upsert_subscription(&self, sub: &Subscription) -> StorageResult<()>;
    async fn subscription(&self, id: Uuid) -> StorageResult<Option<Subscription>>;
    async fn subscription_by_external_ref(
        &self,
        external_ref: &str,
    ) -> StorageResult<Option<Subscription>>;
    /// Active, auto-renewing subscriptions whose period ends before `before`.
    async fn subscriptions_due_for_renewal(
        &self,
        before: DateTime<Utc>,
    ) -> StorageResult<Vec<Subscription>>;
    /// Whether a renewal intent was already created for this period.
    async fn renewal_intent_exists(
        &self,
        subscription_id: Uuid,
        period_end: DateTime<Utc>,
    ) -> StorageResult<bool>;

    // Operator queue and webhook trace
    async fn record_reconciliation(&self, record: ReconciliationRecord) -> StorageResult<()>;
    async fn pending_reconciliations(&self) -> StorageResult<Vec<ReconciliationRecord>>;
    async fn log_webhook(&self, entry: WebhookLogEntry) -> StorageResult<()>;
    async fn webhook_log(&self) -> StorageResult<Vec<WebhookLogEntry>>;
}

/// Metadata key tying a renewal intent to the period it pays for.
pub(crate) const RENEWAL_PERIOD_KEY: &str = "renewal_period_end";

#[derive(Default)]
struct MemoryState {
    intents: HashMap<Uuid, PaymentIntent>,
    by_external_ref: HashMap<String, Uuid>,
    coupons: HashMap<String, Coupon>,
    discount_applications: Vec<DiscountApplication>,
    referral_codes: HashMap<String, ReferralCode>,
    /// referred user -> code used.
    referrals: HashMap<UserId, String>,
    rewards: Vec<ReferralReward>,
    subscriptions: HashMap<Uuid, Subscription>,
    reconciliations: Vec<ReconciliationRecord>,
    webhook_log: Vec<WebhookLogEntry>,
}

impl MemoryState {
    fn index_intent(&mut self, intent: &PaymentIntent) {
        if let Some(external_ref) = &intent.external_ref {
            self.by_external_ref.insert(external_ref.clone(), intent.id);
        }
    }

    fn user_coupon_uses(&self, code: &str, user: UserId) -> u32 {
        self.discount_applications
            .iter()
            .filter(|a| a.coupon_code.eq_ignore_ascii_case(code) && a.user_id == user)
            .count() as u32
    }

    /// The conditional increment: re-checks both caps under the lock.
    fn consume_coupon(&mut self, application: &DiscountApplication) -> StorageResult<()> {
        let code_key = application.coupon_code.to_uppercase();
        let user_uses = self.user_coupon_uses(&application.coupon_code, application.user_id);
        let coupon = match self.coupons.get_mut(&code_key) {
            Some(c) => c,
            None => bail!("coupon '{}' disappeared", application.coupon_code),
        };
        if coupon.max_uses > 0 && coupon.uses >= coupon.max_uses {
            bail!("coupon '{}' usage limit reached", coupon.code);
        }
        if coupon.per_user_limit > 0 && user_uses >= coupon.per_user_limit {
            bail!(
                "coupon '{}' per-user limit reached for user {}",
                coupon.code,
                application.user_id
            );
        }
        coupon.uses += 1;
        self.discount_applications.push(application.clone());
        Ok(())
    }
}

/// In-memory store. One mutex guards all state, which is what makes the
/// commit unit and the CAS transition trivially atomic.
#[derive(Default)]
pub struct MemoryBillingStore {
    state: Mutex<MemoryState>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All discount applications recorded so far (inspection/tests).
    pub fn discount_applications(&self) -> Vec<DiscountApplication> {
        self.lock().discount_applications.clone()
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn insert_intent(&self, intent: &PaymentIntent) -> StorageResult<()> {
        let mut state = self.lock();
        state.index_intent(intent);
        state.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn intent(&self, id: Uuid) -> StorageResult<Option<PaymentIntent>> {
        Ok(self.lock().intents.get(&id).cloned())
    }

    async fn intent_by_external_ref(
        &self,
        external_ref: &str,
    ) -> StorageResult<Option<PaymentIntent>> {
        let state = self.lock();
        Ok(state
            .by_external_ref
            .get(external_ref)
            .and_then(|id| state.intents.get(id))
            .cloned())
    }

    async fn transition_intent(
        &self,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
    ) -> StorageResult<bool> {
        if !from.can_transition_to(to) {
            bail!("illegal intent transition {from} -> {to}");
        }
        let mut state = self.lock();
        let intent = match state.intents.get_mut(&id) {
            Some(i) => i,
            None => bail!("intent {id} not found"),
        };
        if intent.status != from {
            return Ok(false);
        }
        intent.status = to;
        intent.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_refund(&self, id: Uuid, amount: Amount, full: bool) -> StorageResult<()> {
        let mut state = self.lock();
        let intent = match state.intents.get_mut(&id) {
            Some(i) => i,
            None => bail!("intent {id} not found"),
        };
        let new_total = intent
            .refunded
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("refund overflow"))?;
        if new_total > intent.amount {
            bail!("refund total {new_total} would exceed charge {}", intent.amount);
        }
        intent.refunded = new_total;
        if full {
            intent.status = IntentStatus::Refunded;
        }
        intent.updated_at = Utc::now();
        Ok(())
    }

    async fn has_completed_payment(&self, user: UserId) -> StorageResult<bool> {
        let state = self.lock();
        Ok(state.intents.values().any(|i| {
            i.user_id == user
                && matches!(i.status, IntentStatus::Completed | IntentStatus::Refunded)
        }))
    }

    async fn upsert_coupon(&self, coupon: &Coupon) -> StorageResult<()> {
        self.lock()
            .coupons
            .insert(coupon.code.to_uppercase(), coupon.clone());
        Ok(())
    }

    async fn coupon(&self, code: &str) -> StorageResult<Option<Coupon>> {
        Ok(self.lock().coupons.get(&code.to_uppercase()).cloned())
    }

    async fn coupon_uses_by_user(&self, code: &str, user: UserId) -> StorageResult<u32> {
        Ok(self.lock().user_coupon_uses(code, user))
    }

    async fn upsert_referral_code(&self, code: &ReferralCode) -> StorageResult<()> {
        self.lock()
            .referral_codes
            .insert(code.code.to_uppercase(), code.clone());
        Ok(())
    }

    async fn referral_code(&self, code: &str) -> StorageResult<Option<ReferralCode>> {
        Ok(self.lock().referral_codes.get(&code.to_uppercase()).cloned())
    }

    async fn is_referred(&self, user: UserId) -> StorageResult<bool> {
        Ok(self.lock().referrals.contains_key(&user))
    }

    async fn record_referral(&self, code: &str, referred: UserId) -> StorageResult<()> {
        let mut state = self.lock();
        let key = code.to_uppercase();
        let entry = match state.referral_codes.get_mut(&key) {
            Some(c) => c,
            None => bail!("referral code '{code}' not found"),
        };
        entry.uses += 1;
        state.referrals.insert(referred, key);
        Ok(())
    }

    async fn rewards_for(&self, referrer: UserId) -> StorageResult<Vec<ReferralReward>> {
        Ok(self
            .lock()
            .rewards
            .iter()
            .filter(|r| r.referrer == referrer)
            .cloned()
            .collect())
    }

    async fn commit_charge(&self, commit: ChargeCommit) -> StorageResult<CommitReport> {
        let mut state = self.lock();
        let mut report = CommitReport::default();

        // The coupon increment is the only fallible step; it runs first so a
        // failed commit leaves no partial state behind.
        if let Some(discount) = &commit.discount {
            state.consume_coupon(discount)?;
        }

        if let Some(reward) = &commit.reward {
            let already = state
                .rewards
                .iter()
                .any(|r| r.referrer == reward.referrer && r.referred == reward.referred);
            if already {
                report.reward_granted = false;
            } else {
                state.rewards.push(reward.clone());
                report.reward_granted = true;
            }
        }

        state.index_intent(&commit.intent);
        state.intents.insert(commit.intent.id, commit.intent);

        Ok(report)
    }

    async fn upsert_subscription(&self, sub: &Subscription) -> StorageResult<()> {
        self.lock().subscriptions.insert(sub.id, sub.clone());
        Ok(())
    }

    async fn subscription(&self, id: Uuid) -> StorageResult<Option<Subscription>> {
        Ok(self.lock().subscriptions.get(&id).cloned())
    }

    async fn subscription_by_external_ref(
        &self,
        external_ref: &str,
    ) -> StorageResult<Option<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .find(|s| s.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn subscriptions_due_for_renewal(
        &self,
        before: DateTime<Utc>,
    ) -> StorageResult<Vec<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| {
                s.status == SubscriptionStatus::Active
                    && s.auto_renew
                    && s.current_period_end <= before
            })
            .cloned()
            .collect())
    }

    async fn renewal_intent_exists(
        &self,
        subscription_id: Uuid,
        period_end: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let marker = period_end.to_rfc3339();
        Ok(self.lock().intents.values().any(|i| {
            i.subscription_id == Some(subscription_id)
                && i.status != IntentStatus::Failed
                && i.metadata.get(RENEWAL_PERIOD_KEY) == Some(&marker)
        }))
    }

    async fn record_reconciliation(&self, record: ReconciliationRecord) -> StorageResult<()> {
        self.lock().reconciliations.push(record);
        Ok(())
    }

    async fn pending_reconciliations(&self) -> StorageResult<Vec<ReconciliationRecord>> {
        Ok(self.lock().reconciliations.clone())
    }

    async fn log_webhook(&self, entry: WebhookLogEntry) -> StorageResult<()> {
        self.lock().webhook_log.push(entry);
        Ok(())
    }

    async fn webhook_log(&self) -> StorageResult<Vec<WebhookLogEntry>> {
        Ok(self.lock().webhook_log.clone())
    }
}

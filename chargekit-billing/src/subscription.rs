//! Minimal subscription record and the collaborator hooks the dispatcher
//! drives after invoice and subscription lifecycle events.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chargekit_providers::{Amount, ProviderName};

use crate::{StorageResult, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingPeriod {
    /// Length of one period.
    pub fn duration(self) -> Duration {
        match self {
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(30),
            Self::Quarterly => Duration::days(90),
            Self::Yearly => Duration::days(365),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    /// Payment failed; access should be limited until it recovers.
    Suspended,
    Cancelled,
    Expired,
}

/// A recurring billing agreement.
///
/// The ordered payment history lives in the intents referencing this
/// subscription; the record itself only tracks the current period.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub plan: String,
    pub amount: Amount,
    pub currency: String,
    pub provider: ProviderName,
    pub period: BillingPeriod,
    pub status: SubscriptionStatus,
    pub auto_renew: bool,
    pub current_period_end: DateTime<Utc>,
    /// Provider-side subscription reference, when the provider manages the
    /// recurrence itself.
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        user_id: UserId,
        plan: impl Into<String>,
        amount: Amount,
        currency: impl Into<String>,
        provider: ProviderName,
        period: BillingPeriod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan: plan.into(),
            amount,
            currency: currency.into(),
            provider,
            period,
            status: SubscriptionStatus::Active,
            auto_renew: true,
            current_period_end: now + period.duration(),
            external_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Subscription side effects invoked by webhook reconciliation and the
/// renewal sweep. The billing core never suspends access or extends periods
/// on its own; it reports through this seam.
#[async_trait]
pub trait SubscriptionHooks: Send + Sync {
    /// An invoice for the subscription settled; extend the current period.
    async fn mark_renewed(&self, subscription_id: Uuid, intent_id: Uuid) -> StorageResult<()>;

    /// An invoice failed; the subscription should lose access until repaired.
    async fn mark_suspended(&self, subscription_id: Uuid, reason: &str) -> StorageResult<()>;

    /// The provider reports the subscription as cancelled.
    async fn mark_cancelled(&self, subscription_id: Uuid) -> StorageResult<()>;
}

/// Hooks implementation that maintains the local subscription records.
pub struct StoreSubscriptionHooks {
    store: std::sync::Arc<dyn crate::storage::BillingStore>,
}

impl StoreSubscriptionHooks {
    pub fn new(store: std::sync::Arc<dyn crate::storage::BillingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SubscriptionHooks for StoreSubscriptionHooks {
    async fn mark_renewed(&self, subscription_id: Uuid, intent_id: Uuid) -> StorageResult<()> {
        let Some(mut sub) = self.store.subscription(subscription_id).await? else {
            anyhow::bail!("subscription {subscription_id} not found");
        };
        // Extend from the scheduled end, or from now if the renewal is late.
        let base = sub.current_period_end.max(Utc::now());
        sub.current_period_end = base + sub.period.duration();
        sub.status = SubscriptionStatus::Active;
        sub.updated_at = Utc::now();
        self.store.upsert_subscription(&sub).await?;
        tracing::info!(
            subscription_id = %subscription_id,
            intent_id = %intent_id,
            period_end = %sub.current_period_end,
            "subscription renewed"
        );
        Ok(())
    }

    async fn mark_suspended(&self, subscription_id: Uuid, reason: &str) -> StorageResult<()> {
        let Some(mut sub) = self.store.subscription(subscription_id).await? else {
            anyhow::bail!("subscription {subscription_id} not found");
        };
        sub.status = SubscriptionStatus::Suspended;
        sub.updated_at = Utc::now();
        self.store.upsert_subscription(&sub).await?;
        tracing::warn!(subscription_id = %subscription_id, reason, "subscription suspended");
        Ok(())
    }

    async fn mark_cancelled(&self, subscription_id: Uuid) -> StorageResult<()> {
        let Some(mut sub) = self.store.subscription(subscription_id).await? else {
            anyhow::bail!("subscription {subscription_id} not found");
        };
        sub.status = SubscriptionStatus::Cancelled;
        sub.auto_renew = false;
        sub.updated_at = Utc::now();
        self.store.upsert_subscription(&sub).await?;
        tracing::info!(subscription_id = %subscription_id, "subscription cancelled");
        Ok(())
    }
}

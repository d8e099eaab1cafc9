//! The charge workflow.
//!
//! One entry point chains coupon validation, discount computation, the
//! provider charge, and a single atomic local commit of everything the
//! charge changed (intent, coupon usage, referral reward).
//!
//! Ordering is deliberate: every check that can abort runs before the
//! provider is contacted, and all local writes happen after, in one unit.
//! When that unit fails after a provider-side success, the divergence is
//! durably recorded for an operator — see the crate docs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use chargekit_providers::{
    Amount, ChargeSpec, PaymentManager, PaymentResult, ProviderName, ProviderStatus,
};

use crate::coupon::{CouponError, DiscountApplication};
use crate::intent::{IntentStatus, PaymentIntent};
use crate::referral::ReferralReward;
use crate::storage::{
    BillingStore, ChargeCommit, ReconciliationKind, ReconciliationRecord,
};
use crate::{BillingError, UserId};

/// A request to collect money from a user.
#[derive(Clone, Debug)]
pub struct ChargeRequest {
    pub user_id: UserId,
    /// Base price before any discount.
    pub amount: Amount,
    pub currency: String,
    /// Provider to charge through; the configured default when `None`.
    pub provider: Option<ProviderName>,
    pub description: Option<String>,
    pub coupon_code: Option<String>,
    pub referral_code: Option<String>,
    /// Plan name, for coupon plan-eligibility checks.
    pub plan: Option<String>,
    pub subscription_id: Option<Uuid>,
    pub metadata: HashMap<String, String>,
}

impl ChargeRequest {
    pub fn new(user_id: UserId, amount: Amount, currency: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            currency: currency.into(),
            provider: None,
            description: None,
            coupon_code: None,
            referral_code: None,
            plan: None,
            subscription_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderName) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn with_referral(mut self, code: impl Into<String>) -> Self {
        self.referral_code = Some(code.into());
        self
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn with_subscription(mut self, subscription_id: Uuid) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The unified result handed back to the API layer.
#[derive(Clone, Debug)]
pub struct ChargeOutcome {
    pub intent_id: Uuid,
    /// What was actually charged, after discount.
    pub amount_charged: Amount,
    pub provider: ProviderName,
    pub status: IntentStatus,
    pub discount: Option<DiscountApplication>,
    pub reward: Option<ReferralReward>,
}

pub struct PaymentOrchestrator {
    manager: Arc<PaymentManager>,
    store: Arc<dyn BillingStore>,
}

impl PaymentOrchestrator {
    pub fn new(manager: Arc<PaymentManager>, store: Arc<dyn BillingStore>) -> Self {
        Self { manager, store }
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    /// Run the full charge workflow.
    ///
    /// Caller-side cancellation is only safe before the provider call is
    /// issued; once it is in flight, the future should be driven to
    /// completion (the manager's timeout bounds it) so that a charge that
    /// may have succeeded is never silently abandoned.
    pub async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, BillingError> {
        let user_has_paid_before = self.store.has_completed_payment(request.user_id).await?;

        // Step 1: coupon validation. Aborts before any money moves.
        let discount = match &request.coupon_code {
            Some(code) => Some(
                self.validate_coupon(code, &request, user_has_paid_before)
                    .await?,
            ),
            None => None,
        };

        // Step 2: the chargeable amount, floored at zero.
        let final_amount = discount
            .as_ref()
            .map(|d| d.final_amount)
            .unwrap_or(request.amount);

        // Referral application is best-effort: a bad code is logged and
        // ignored, it never blocks the purchase.
        let reward = match &request.referral_code {
            Some(code) => {
                self.apply_referral(code, request.user_id, user_has_paid_before)
                    .await?
            }
            None => None,
        };

        // Step 3: the external charge, skipped entirely on the zero-amount
        // fast path.
        let provider_result = if final_amount.is_positive() {
            let spec = self.build_spec(&request, final_amount);
            let result = self.manager.create_payment(request.provider, &spec).await?;

            if !result.success {
                return Err(self.record_declined(&request, final_amount, result).await?);
            }
            Some(result)
        } else {
            None
        };

        let provider = request.provider.unwrap_or_else(|| {
            self.manager
                .registry()
                .default_provider()
                .unwrap_or(ProviderName::Card)
        });

        // Step 4: fold the result into the durable intent.
        let (status, external_ref) = match &provider_result {
            Some(result) => {
                let status = match result.status {
                    ProviderStatus::Succeeded => IntentStatus::Completed,
                    _ => IntentStatus::Pending,
                };
                (status, result.external_ref.clone())
            }
            // A fully discounted charge completes without a provider; the
            // reference is synthesized so the audit trail stays linkable.
            None => (
                IntentStatus::Completed,
                Some(format!("free_{}", Uuid::new_v4().simple())),
            ),
        };

        let mut metadata = request.metadata.clone();
        if let Some(code) = &request.coupon_code {
            metadata.insert("coupon_code".to_string(), code.clone());
        }
        if let Some(code) = &request.referral_code {
            metadata.insert("referral_code".to_string(), code.clone());
        }

        let mut intent = PaymentIntent::new(
            request.user_id,
            final_amount,
            request.currency.clone(),
            provider,
        )
        .with_status(status)
        .with_metadata(metadata);
        intent.subscription_id = request.subscription_id;
        intent.description = request.description.clone();
        intent.external_ref = external_ref.clone();

        let intent_id = intent.id;

        // Step 5: one atomic local unit for everything the charge changed.
        let commit = ChargeCommit {
            intent,
            discount: discount.clone(),
            reward: reward.clone(),
        };

        let report = match self.store.commit_charge(commit).await {
            Ok(report) => report,
            // Reconciliation applies only when money already moved; on the
            // zero-amount path a failed commit is an ordinary local error.
            Err(err) if provider_result.is_some() => {
                return Err(self
                    .handle_commit_failure(&request, provider, external_ref, err)
                    .await?);
            }
            Err(err) => return Err(BillingError::Storage(err)),
        };

        if reward.is_some() && !report.reward_granted {
            tracing::warn!(
                user_id = request.user_id,
                "referral reward already granted for this pair, skipped"
            );
        }

        tracing::info!(
            intent_id = %intent_id,
            user_id = request.user_id,
            amount = %final_amount,
            currency = %request.currency,
            provider = %provider,
            status = %status,
            "charge recorded"
        );

        Ok(ChargeOutcome {
            intent_id,
            amount_charged: final_amount,
            provider,
            status,
            discount,
            reward: reward.filter(|_| report.reward_granted),
        })
    }

    async fn validate_coupon(
        &self,
        code: &str,
        request: &ChargeRequest,
        user_has_paid_before: bool,
    ) -> Result<DiscountApplication, BillingError> {
        let Some(coupon) = self.store.coupon(code).await? else {
            return Err(BillingError::CouponInvalid(format!("unknown code '{code}'")));
        };
        let user_uses = self
            .store
            .coupon_uses_by_user(code, request.user_id)
            .await?;

        coupon
            .validate(
                Utc::now(),
                request.amount,
                request.plan.as_deref(),
                user_uses,
                user_has_paid_before,
            )
            .map_err(|err| match err {
                CouponError::Expired => BillingError::CouponExpired {
                    code: coupon.code.clone(),
                },
                CouponError::UsageLimitExceeded | CouponError::PerUserLimitExceeded => {
                    BillingError::CouponUsageLimitExceeded {
                        code: coupon.code.clone(),
                    }
                }
                other => BillingError::CouponInvalid(other.to_string()),
            })?;

        Ok(DiscountApplication::new(
            &coupon,
            request.user_id,
            request.amount,
        ))
    }

    /// Apply a referral code and, when this charge is the referred user's
    /// first payment, prepare the referrer's reward for the commit unit.
    async fn apply_referral(
        &self,
        code: &str,
        user_id: UserId,
        user_has_paid_before: bool,
    ) -> Result<Option<ReferralReward>, BillingError> {
        let Some(referral) = self.store.referral_code(code).await? else {
            tracing::warn!(user_id, code, "referral code not found, ignoring");
            return Ok(None);
        };

        let already_referred = self.store.is_referred(user_id).await?;
        if let Err(err) = referral.validate(user_id, already_referred) {
            tracing::warn!(user_id, code, error = %err, "referral code rejected, ignoring");
            return Ok(None);
        }

        self.store.record_referral(code, user_id).await?;

        // The reward is earned by the referred user's first successful
        // payment only; it rides in the same commit as the intent.
        if user_has_paid_before {
            Ok(None)
        } else {
            Ok(Some(ReferralReward::new(&referral, user_id)))
        }
    }

    fn build_spec(&self, request: &ChargeRequest, amount: Amount) -> ChargeSpec {
        let mut spec = ChargeSpec::new(amount, request.currency.clone())
            .with_metadata("user_id", request.user_id.to_string());
        spec.metadata.extend(request.metadata.clone());
        if let Some(code) = &request.coupon_code {
            spec.metadata.insert("coupon_code".to_string(), code.clone());
        }
        if let Some(code) = &request.referral_code {
            spec.metadata
                .insert("referral_code".to_string(), code.clone());
        }
        spec.description = request.description.clone();
        spec
    }

    /// Persist the failed attempt for audit, then report the decline. No
    /// coupon usage or reward bookkeeping happens on this path.
    async fn record_declined(
        &self,
        request: &ChargeRequest,
        final_amount: Amount,
        result: PaymentResult,
    ) -> Result<BillingError, BillingError> {
        let provider = request
            .provider
            .or_else(|| self.manager.registry().default_provider())
            .unwrap_or(ProviderName::Card);
        let reason = result
            .reason
            .unwrap_or_else(|| "declined by provider".to_string());

        let mut intent = PaymentIntent::new(
            request.user_id,
            final_amount,
            request.currency.clone(),
            provider,
        )
        .with_status(IntentStatus::Failed);
        intent.external_ref = result.external_ref;
        intent.description = request.description.clone();
        self.store.insert_intent(&intent).await?;

        tracing::warn!(
            intent_id = %intent.id,
            user_id = request.user_id,
            provider = %provider,
            reason = %reason,
            "charge declined"
        );

        Ok(BillingError::PaymentDeclined { reason })
    }

    /// A provider-side success followed by a local commit failure. The money
    /// moved; record that durably and hand the case to an operator.
    async fn handle_commit_failure(
        &self,
        request: &ChargeRequest,
        provider: ProviderName,
        external_ref: Option<String>,
        err: anyhow::Error,
    ) -> Result<BillingError, BillingError> {
        let external_ref = external_ref.unwrap_or_else(|| "<none>".to_string());
        let detail = format!("local commit failed after external charge: {err}");

        tracing::error!(
            user_id = request.user_id,
            provider = %provider,
            external_ref = %external_ref,
            error = %err,
            "RECONCILIATION REQUIRED: provider charge succeeded but local commit failed"
        );

        self.store
            .record_reconciliation(ReconciliationRecord::new(
                ReconciliationKind::LocalCommitFailed,
                provider,
                external_ref.clone(),
                detail.clone(),
            ))
            .await?;

        Ok(BillingError::ReconciliationRequired {
            external_ref,
            detail,
        })
    }
}

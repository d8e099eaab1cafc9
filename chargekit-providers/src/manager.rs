//! Payment manager facade.
//!
//! Thin layer over the registry that every caller goes through. It adds the
//! one thing adapters must not be trusted to do uniformly: a hard ceiling on
//! how long any provider call may run. Timeouts and transport failures come
//! back as failed [`PaymentResult`]s with a machine-readable reason, so no
//! raw transport error ever escapes this layer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{ChargeSpec, PaymentResult, RefundAmount, WebhookEvent};
use crate::registry::ProviderRegistry;
use crate::{ProviderError, ProviderName, Result};

/// Reason string reported when an adapter call exceeds the ceiling.
pub const REASON_TIMEOUT: &str = "provider_timeout";
/// Reason string reported when the provider cannot be reached.
pub const REASON_UNREACHABLE: &str = "provider_unreachable";

pub struct PaymentManager {
    registry: Arc<ProviderRegistry>,
    call_timeout: Duration,
}

impl PaymentManager {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let call_timeout = registry.call_timeout();
        Self {
            registry,
            call_timeout,
        }
    }

    /// Override the adapter call ceiling (tests mostly).
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Resolve an explicit provider or fall back to the configured default.
    fn pick(&self, provider: Option<ProviderName>) -> Result<ProviderName> {
        match provider.or_else(|| self.registry.default_provider()) {
            Some(name) => Ok(name),
            None => Err(ProviderError::invalid_data(
                "provider",
                "no provider named and no default configured",
            )),
        }
    }

    /// Initiate a charge through the named (or default) provider.
    pub async fn create_payment(
        &self,
        provider: Option<ProviderName>,
        spec: &ChargeSpec,
    ) -> Result<PaymentResult> {
        let name = self.pick(provider)?;
        let adapter = self.registry.resolve(name)?;
        self.guarded(name, "charge", None, adapter.charge(spec)).await
    }

    /// Confirm a previously created charge.
    pub async fn confirm_payment(
        &self,
        provider: ProviderName,
        external_ref: &str,
    ) -> Result<PaymentResult> {
        let adapter = self.registry.resolve(provider)?;
        self.guarded(
            provider,
            "confirm",
            Some(external_ref),
            adapter.confirm(external_ref),
        )
        .await
    }

    /// Refund a settled charge.
    ///
    /// Capability gaps (`ProviderError::Unsupported`) propagate as typed
    /// errors; only wire trouble is normalized into a failed result.
    pub async fn refund_payment(
        &self,
        provider: ProviderName,
        external_ref: &str,
        amount: RefundAmount,
    ) -> Result<PaymentResult> {
        let adapter = self.registry.resolve(provider)?;
        self.guarded(
            provider,
            "refund",
            Some(external_ref),
            adapter.refund(external_ref, amount),
        )
        .await
    }

    /// Verify and canonicalize a webhook delivery for the named provider.
    pub fn parse_webhook(
        &self,
        provider: ProviderName,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent> {
        let adapter = self.registry.resolve(provider)?;
        adapter.parse_webhook(raw_body, signature_header)
    }

    /// Run an adapter call under the ceiling, normalizing timeouts and
    /// transport failures into failed results.
    async fn guarded<F>(
        &self,
        provider: ProviderName,
        operation: &'static str,
        external_ref: Option<&str>,
        call: F,
    ) -> Result<PaymentResult>
    where
        F: Future<Output = Result<PaymentResult>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) if matches!(err, ProviderError::Transport(_)) => {
                tracing::warn!(
                    provider = %provider,
                    operation,
                    external_ref = external_ref.unwrap_or("-"),
                    error = %err,
                    "provider unreachable"
                );
                Ok(PaymentResult::declined(REASON_UNREACHABLE))
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => {
                tracing::warn!(
                    provider = %provider,
                    operation,
                    external_ref = external_ref.unwrap_or("-"),
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "provider call timed out"
                );
                Ok(PaymentResult::declined(REASON_TIMEOUT))
            }
        }
    }
}

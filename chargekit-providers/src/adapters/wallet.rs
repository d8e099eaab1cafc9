//! Wallet processor adapter.
//!
//! Order/capture flow: `charge` creates an order and captures it in one
//! call; an order left awaiting buyer approval settles through `confirm` or
//! the capture webhook.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{
    ChargeSpec, EventKind, PaymentResult, ProviderAdapter, ProviderStatus, RefundAmount,
    WebhookEvent,
};
use crate::config::WalletConfig;
use crate::gateway::ProviderGateway;
use crate::signature;
use crate::{ProviderError, ProviderName, Result};

pub struct WalletAdapter {
    config: WalletConfig,
    api_base: String,
    gateway: Arc<dyn ProviderGateway>,
}

impl WalletAdapter {
    pub fn new(config: WalletConfig, gateway: Arc<dyn ProviderGateway>) -> Self {
        Self {
            config,
            api_base: "https://api.walletgate.example".to_string(),
            gateway,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(ProviderName::Wallet))
        }
    }

    fn order_result(response: Value) -> PaymentResult {
        let id = response
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match status {
            "COMPLETED" => PaymentResult::succeeded(id, response),
            "CREATED" | "APPROVED" | "PENDING" => PaymentResult::pending(id, response),
            _ => {
                let reason = response
                    .get("status_details")
                    .and_then(|d| d.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("declined by wallet provider")
                    .to_string();
                PaymentResult {
                    success: false,
                    external_ref: Some(id.to_string()),
                    status: ProviderStatus::Failed,
                    reason: Some(reason),
                    raw: response,
                }
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for WalletAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Wallet
    }

    fn display_name(&self) -> &'static str {
        "Wallet"
    }

    fn is_configured(&self) -> bool {
        self.config.is_usable()
    }

    fn supports_refunds(&self) -> bool {
        true
    }

    async fn charge(&self, spec: &ChargeSpec) -> Result<PaymentResult> {
        self.ensure_configured()?;

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": spec.currency,
                    "value": spec.amount.to_string(),
                },
                "description": spec.description,
                "custom_id": spec.metadata.get("user_id"),
            }],
        });

        tracing::debug!(
            provider = %self.name(),
            amount = %spec.amount,
            currency = %spec.currency,
            "creating wallet order"
        );

        let response = self
            .gateway
            .post(&self.url("/v2/checkout/orders"), body)
            .await?;
        Ok(Self::order_result(response))
    }

    async fn confirm(&self, external_ref: &str) -> Result<PaymentResult> {
        self.ensure_configured()?;

        let response = self
            .gateway
            .post(
                &self.url(&format!("/v2/checkout/orders/{external_ref}/capture")),
                json!({}),
            )
            .await?;
        Ok(Self::order_result(response))
    }

    async fn refund(&self, external_ref: &str, amount: RefundAmount) -> Result<PaymentResult> {
        self.ensure_configured()?;

        // Empty body means a full refund of the capture.
        let body = match amount {
            RefundAmount::Full => json!({}),
            RefundAmount::Partial(amount) => json!({
                "amount": { "value": amount.to_string() }
            }),
        };

        let response = self
            .gateway
            .post(
                &self.url(&format!("/v2/payments/captures/{external_ref}/refund")),
                body,
            )
            .await?;

        let status = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if status == "COMPLETED" || status == "PENDING" {
            let refund_id = response
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(external_ref)
                .to_string();
            Ok(PaymentResult {
                success: true,
                external_ref: Some(refund_id),
                status: ProviderStatus::Refunded,
                reason: None,
                raw: response,
            })
        } else {
            Ok(PaymentResult::declined("refund rejected by wallet provider"))
        }
    }

    fn parse_webhook(&self, raw_body: &[u8], signature_header: &str) -> Result<WebhookEvent> {
        signature::verify(
            raw_body,
            signature_header,
            &self.config.webhook_secret,
            self.config.signature_tolerance_secs,
        )?;

        let payload: Value = serde_json::from_slice(raw_body)?;
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = match event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" | "PAYMENT.SALE.COMPLETED" => EventKind::ChargeSucceeded,
            "PAYMENT.CAPTURE.DENIED" => EventKind::ChargeFailed,
            "PAYMENT.CAPTURE.REFUNDED" => EventKind::RefundCompleted,
            "PAYMENT.REFUND.FAILED" => EventKind::RefundFailed,
            "BILLING.SUBSCRIPTION.CREATED" => EventKind::SubscriptionCreated,
            "BILLING.SUBSCRIPTION.ACTIVATED" | "BILLING.SUBSCRIPTION.UPDATED" => {
                EventKind::SubscriptionUpdated
            }
            "BILLING.SUBSCRIPTION.CANCELLED" => EventKind::SubscriptionCancelled,
            _ => return Err(ProviderError::UnrecognizedEvent(event_type)),
        };

        let external_ref = payload
            .pointer("/resource/id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_data("webhook", "missing resource id"))?
            .to_string();

        Ok(WebhookEvent::new(
            ProviderName::Wallet,
            kind,
            external_ref,
            payload,
        ))
    }
}

//! Card processor adapter.
//!
//! Two-phase payment-intent flow: `charge` creates an intent that the
//! client-side confirms (or [`CardAdapter::confirm`] does server-side), and
//! settlement lands asynchronously via webhook.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{
    ChargeSpec, EventKind, PaymentResult, ProviderAdapter, ProviderStatus, RefundAmount,
    WebhookEvent,
};
use crate::config::CardConfig;
use crate::gateway::ProviderGateway;
use crate::signature;
use crate::{ProviderError, ProviderName, Result};

pub struct CardAdapter {
    config: CardConfig,
    api_base: String,
    gateway: Arc<dyn ProviderGateway>,
}

impl CardAdapter {
    pub fn new(config: CardConfig, gateway: Arc<dyn ProviderGateway>) -> Self {
        Self {
            config,
            api_base: "https://api.cardgate.example".to_string(),
            gateway,
        }
    }

    /// Point the adapter at a different API host (sandbox, local stub).
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
            Err(ProviderError::NotConfigured(ProviderName::Card))
        }
    }

    fn map_status(status: &str) -> ProviderStatus {
        match status {
            "succeeded" => ProviderStatus::Succeeded,
            "requires_confirmation" | "requires_action" | "processing" => ProviderStatus::Pending,
            _ => ProviderStatus::Failed,
        }
    }

    /// Fold a payment-intent API response into a result. Declines are
    /// unsuccessful results, not errors.
    fn intent_result(&self, response: Value) -> PaymentResult {
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("declined by provider");
            return PaymentResult {
                success: false,
                external_ref: error
                    .get("payment_intent")
                    .and_then(|pi| pi.get("id"))
                    .and_then(Value::as_str)
                    .map(String::from),
                status: ProviderStatus::Failed,
                reason: Some(message.to_string()),
                raw: response,
            };
        }

        let id = response
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("requires_confirmation");

        match Self::map_status(status) {
            ProviderStatus::Failed => {
                let reason = response
                    .get("last_payment_error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("declined by provider")
                    .to_string();
                PaymentResult {
                    success: false,
                    external_ref: Some(id.to_string()),
                    status: ProviderStatus::Failed,
                    reason: Some(reason),
                    raw: response,
                }
            }
            ProviderStatus::Succeeded => PaymentResult::succeeded(id, response),
            _ => PaymentResult::pending(id, response),
        }
    }
}

#[async_trait]
impl ProviderAdapter for CardAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Card
    }

    fn display_name(&self) -> &'static str {
        "Card"
    }

    fn is_configured(&self) -> bool {
        self.config.is_usable()
    }

    fn supports_refunds(&self) -> bool {
        true
    }

    async fn charge(&self, spec: &ChargeSpec) -> Result<PaymentResult> {
        self.ensure_configured()?;

        let mut body = json!({
            "amount": spec.amount.as_cents(),
            "currency": spec.currency.to_lowercase(),
            "metadata": spec.metadata,
            "automatic_payment_methods": { "enabled": true },
        });
        if let Some(description) = &spec.description {
            body["description"] = json!(description);
        }
        if let Some(email) = &spec.customer_email {
            body["receipt_email"] = json!(email);
        }

        tracing::debug!(
            provider = %self.name(),
            amount = %spec.amount,
            currency = %spec.currency,
            "creating card payment intent"
        );

        let response = self
            .gateway
            .post(&self.url("/v1/payment_intents"), body)
            .await?;
        Ok(self.intent_result(response))
    }

    async fn confirm(&self, external_ref: &str) -> Result<PaymentResult> {
        self.ensure_configured()?;

        let response = self
            .gateway
            .post(
                &self.url(&format!("/v1/payment_intents/{external_ref}/confirm")),
                json!({}),
            )
            .await?;
        Ok(self.intent_result(response))
    }

    async fn refund(&self, external_ref: &str, amount: RefundAmount) -> Result<PaymentResult> {
        self.ensure_configured()?;

        let mut body = json!({ "payment_intent": external_ref });
        if let RefundAmount::Partial(amount) = amount {
            body["amount"] = json!(amount.as_cents());
        }

        let response = self.gateway.post(&self.url("/v1/refunds"), body).await?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("refund rejected");
            return Ok(PaymentResult {
                success: false,
                external_ref: Some(external_ref.to_string()),
                status: ProviderStatus::Failed,
                reason: Some(message.to_string()),
                raw: response,
            });
        }

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
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = match event_type.as_str() {
            "payment_intent.succeeded" => EventKind::ChargeSucceeded,
            "payment_intent.payment_failed" => EventKind::ChargeFailed,
            "invoice.paid" => EventKind::InvoicePaid,
            "invoice.payment_failed" => EventKind::InvoiceFailed,
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionCancelled,
            "charge.refunded" => EventKind::RefundCompleted,
            "charge.refund.updated" => EventKind::RefundFailed,
            _ => return Err(ProviderError::UnrecognizedEvent(event_type)),
        };

        // The card processor nests the subject object under data.object. For
        // refund events the charge keeps the original payment-intent id.
        let object = payload.pointer("/data/object").cloned().unwrap_or(Value::Null);
        let external_ref = object
            .get("payment_intent")
            .and_then(Value::as_str)
            .or_else(|| object.get("id").and_then(Value::as_str))
            .ok_or_else(|| ProviderError::invalid_data("webhook", "missing object id"))?
            .to_string();

        Ok(WebhookEvent::new(
            ProviderName::Card,
            kind,
            external_ref,
            payload,
        ))
    }
}

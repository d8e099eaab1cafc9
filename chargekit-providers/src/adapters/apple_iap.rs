//! Apple in-app purchase adapter.
//!
//! Purchases happen on-device; the server side of the flow is receipt
//! validation. `charge` therefore validates the store receipt supplied in
//! the charge metadata instead of initiating anything, and settles
//! synchronously when the receipt checks out. Refunds are handled by Apple
//! and cannot be issued programmatically.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{
    ChargeSpec, EventKind, PaymentResult, ProviderAdapter, ProviderStatus, RefundAmount,
    WebhookEvent,
};
use crate::config::AppleIapConfig;
use crate::gateway::ProviderGateway;
use crate::signature;
use crate::{ProviderError, ProviderName, Result};

/// Metadata key carrying the base64 receipt.
pub const RECEIPT_METADATA_KEY: &str = "receipt_data";

const PRODUCTION_URL: &str = "https://buy.itunes.apple.example/verifyReceipt";
const SANDBOX_URL: &str = "https://sandbox.itunes.apple.example/verifyReceipt";

pub struct AppleIapAdapter {
    config: AppleIapConfig,
    gateway: Arc<dyn ProviderGateway>,
}

impl AppleIapAdapter {
    pub fn new(config: AppleIapConfig, gateway: Arc<dyn ProviderGateway>) -> Self {
        Self { config, gateway }
    }

    fn verify_url(&self) -> &'static str {
        if self.config.sandbox {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        }
    }

    fn status_message(status: i64) -> String {
        match status {
            21002 => "receipt data was malformed".to_string(),
            21003 => "receipt could not be authenticated".to_string(),
            21004 => "shared secret does not match".to_string(),
            21006 => "receipt is valid but the subscription has expired".to_string(),
            21007 => "sandbox receipt sent to production".to_string(),
            other => format!("receipt validation failed with status {other}"),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AppleIapAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::AppleIap
    }

    fn display_name(&self) -> &'static str {
        "Apple In-App Purchase"
    }

    fn is_configured(&self) -> bool {
        self.config.is_usable()
    }

    fn supports_refunds(&self) -> bool {
        false
    }

    async fn charge(&self, spec: &ChargeSpec) -> Result<PaymentResult> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(ProviderName::AppleIap));
        }

        let Some(receipt) = spec.metadata.get(RECEIPT_METADATA_KEY) else {
            // The client forgot to attach the receipt; user-actionable, so a
            // declined result rather than an error.
            return Ok(PaymentResult::declined(
                "receipt data is required for in-app purchases",
            ));
        };

        let body = json!({
            "receipt-data": receipt,
            "password": self.config.shared_secret,
            "exclude-old-transactions": true,
        });

        let response = self.gateway.post(self.verify_url(), body).await?;

        let status = response.get("status").and_then(Value::as_i64).unwrap_or(21000);
        if status != 0 {
            return Ok(PaymentResult::declined(Self::status_message(status)));
        }

        let transaction_id = response
            .pointer("/latest_receipt_info/0/transaction_id")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("iap_{}", uuid::Uuid::new_v4().simple()));

        tracing::info!(
            provider = %self.name(),
            transaction_id = %transaction_id,
            "receipt validated"
        );

        Ok(PaymentResult::succeeded(transaction_id, response))
    }

    async fn confirm(&self, external_ref: &str) -> Result<PaymentResult> {
        // Receipt validation settles synchronously; nothing to confirm.
        Ok(PaymentResult::succeeded(external_ref, Value::Null))
    }

    async fn refund(&self, _external_ref: &str, _amount: RefundAmount) -> Result<PaymentResult> {
        Err(ProviderError::Unsupported {
            provider: ProviderName::AppleIap,
            operation: "refund",
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
        let notification = payload
            .get("notification_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = match notification.as_str() {
            "INITIAL_BUY" | "SUBSCRIBED" => EventKind::SubscriptionCreated,
            "DID_RENEW" => EventKind::InvoicePaid,
            "DID_FAIL_TO_RENEW" => EventKind::InvoiceFailed,
            "DID_CHANGE_RENEWAL_STATUS" => EventKind::SubscriptionUpdated,
            "CANCEL" | "EXPIRED" => EventKind::SubscriptionCancelled,
            "REFUND" => EventKind::RefundCompleted,
            "REFUND_DECLINED" => EventKind::RefundFailed,
            _ => return Err(ProviderError::UnrecognizedEvent(notification)),
        };

        let external_ref = payload
            .get("transaction_id")
            .or_else(|| payload.get("original_transaction_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_data("webhook", "missing transaction id"))?
            .to_string();

        Ok(WebhookEvent::new(
            ProviderName::AppleIap,
            kind,
            external_ref,
            payload,
        ))
    }
}

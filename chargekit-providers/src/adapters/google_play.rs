//! Google Play billing adapter.
//!
//! Like Apple IAP, the purchase happens on-device and the server validates a
//! purchase token. Unlike Apple, the publisher API can acknowledge purchases
//! and issue refunds programmatically.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{
    ChargeSpec, EventKind, PaymentResult, ProviderAdapter, ProviderStatus, RefundAmount,
    WebhookEvent,
};
use crate::config::GooglePlayConfig;
use crate::gateway::ProviderGateway;
use crate::signature;
use crate::{ProviderError, ProviderName, Result};

/// Metadata key carrying the purchase token.
pub const PURCHASE_TOKEN_METADATA_KEY: &str = "purchase_token";
/// Metadata key carrying the product id the token was issued for.
pub const PRODUCT_ID_METADATA_KEY: &str = "product_id";

const API_BASE: &str = "https://androidpublisher.googleapis.example";

pub struct GooglePlayAdapter {
    config: GooglePlayConfig,
    gateway: Arc<dyn ProviderGateway>,
}

impl GooglePlayAdapter {
    pub fn new(config: GooglePlayConfig, gateway: Arc<dyn ProviderGateway>) -> Self {
        Self { config, gateway }
    }

    fn purchase_url(&self, product_id: &str, token: &str) -> String {
        format!(
            "{API_BASE}/androidpublisher/v3/applications/{}/purchases/products/{product_id}/tokens/{token}",
            self.config.package_name
        )
    }
}

#[async_trait]
impl ProviderAdapter for GooglePlayAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::GooglePlay
    }

    fn display_name(&self) -> &'static str {
        "Google Play"
    }

    fn is_configured(&self) -> bool {
        self.config.is_usable()
    }

    fn supports_refunds(&self) -> bool {
        true
    }

    async fn charge(&self, spec: &ChargeSpec) -> Result<PaymentResult> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(ProviderName::GooglePlay));
        }

        let Some(token) = spec.metadata.get(PURCHASE_TOKEN_METADATA_KEY) else {
            return Ok(PaymentResult::declined(
                "purchase token is required for Play billing",
            ));
        };
        let Some(product_id) = spec.metadata.get(PRODUCT_ID_METADATA_KEY) else {
            return Ok(PaymentResult::declined(
                "product id is required for Play billing",
            ));
        };

        let response = self
            .gateway
            .get(&self.purchase_url(product_id, token))
            .await?;

        // purchaseState: 0 purchased, 1 canceled, 2 pending
        let state = response
            .get("purchaseState")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let order_id = response
            .get("orderId")
            .and_then(Value::as_str)
            .unwrap_or(token)
            .to_string();

        let result = match state {
            0 => PaymentResult::succeeded(order_id, response),
            2 => PaymentResult::pending(order_id, response),
            _ => PaymentResult::declined("purchase was cancelled").with_external_ref(order_id),
        };
        Ok(result)
    }

    async fn confirm(&self, external_ref: &str) -> Result<PaymentResult> {
        // Acknowledgement is the closest thing to a confirm step; failing to
        // acknowledge within the store's window voids the purchase.
        let url = format!(
            "{API_BASE}/androidpublisher/v3/applications/{}/orders/{external_ref}:acknowledge",
            self.config.package_name
        );
        self.gateway.post(&url, json!({})).await?;
        Ok(PaymentResult::succeeded(external_ref, Value::Null))
    }

    async fn refund(&self, external_ref: &str, _amount: RefundAmount) -> Result<PaymentResult> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(ProviderName::GooglePlay));
        }

        // The publisher API only refunds whole orders.
        let url = format!(
            "{API_BASE}/androidpublisher/v3/applications/{}/orders/{external_ref}:refund",
            self.config.package_name
        );
        let response = self.gateway.post(&url, json!({})).await?;

        Ok(PaymentResult {
            success: true,
            external_ref: Some(external_ref.to_string()),
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

        // Real-time developer notifications carry either a subscription or a
        // one-time product section.
        let (kind, reference) = if let Some(sub) = payload.get("subscriptionNotification") {
            let notification = sub
                .get("notificationType")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let kind = match notification {
                1 => EventKind::SubscriptionUpdated,  // recovered
                2 => EventKind::InvoicePaid,          // renewed
                3 => EventKind::SubscriptionCancelled,
                4 => EventKind::SubscriptionCreated,  // purchased
                5 | 6 => EventKind::InvoiceFailed,    // on hold / grace period
                7 => EventKind::SubscriptionUpdated,  // restarted
                12 => EventKind::RefundCompleted,     // revoked
                other => {
                    return Err(ProviderError::UnrecognizedEvent(format!(
                        "subscription notification {other}"
                    )))
                }
            };
            (kind, sub.get("purchaseToken"))
        } else if let Some(otp) = payload.get("oneTimeProductNotification") {
            let notification = otp
                .get("notificationType")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let kind = match notification {
                1 => EventKind::ChargeSucceeded,
                2 => EventKind::ChargeFailed,
                other => {
                    return Err(ProviderError::UnrecognizedEvent(format!(
                        "one-time product notification {other}"
                    )))
                }
            };
            (kind, otp.get("orderId").or_else(|| otp.get("purchaseToken")))
        } else {
            return Err(ProviderError::UnrecognizedEvent(
                "missing notification section".to_string(),
            ));
        };

        let external_ref = reference
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_data("webhook", "missing purchase reference"))?
            .to_string();

        Ok(WebhookEvent::new(
            ProviderName::GooglePlay,
            kind,
            external_ref,
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockGateway;
    use crate::Amount;

    fn adapter() -> (GooglePlayAdapter, MockGateway) {
        let mut config = GooglePlayConfig::new("com.example.app", "service-account-json");
        config.webhook_secret = "play_wh_secret".to_string();
        let gateway = MockGateway::new();
        (
            GooglePlayAdapter::new(config, Arc::new(gateway.clone())),
            gateway,
        )
    }

    fn spec_with_token() -> ChargeSpec {
        ChargeSpec::new(Amount::from_cents(999), "USD")
            .with_metadata(PURCHASE_TOKEN_METADATA_KEY, "token_abc")
            .with_metadata(PRODUCT_ID_METADATA_KEY, "pro_upgrade")
    }

    #[tokio::test]
    async fn purchased_token_succeeds_with_order_id() {
        let (adapter, gateway) = adapter();
        gateway.stub(
            "/tokens/token_abc",
            json!({"purchaseState": 0, "orderId": "GPA.3372-4141-9017-28617"}),
        );

        let result = adapter.charge(&spec_with_token()).await.unwrap();
        assert!(result.success);
        assert_eq!(
            result.external_ref.as_deref(),
            Some("GPA.3372-4141-9017-28617")
        );
    }

    #[tokio::test]
    async fn cancelled_purchase_is_declined() {
        let (adapter, gateway) = adapter();
        gateway.stub("/tokens/token_abc", json!({"purchaseState": 1}));

        let result = adapter.charge(&spec_with_token()).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn refund_goes_through_orders_api() {
        let (adapter, gateway) = adapter();
        gateway.stub(":refund", json!({}));

        let result = adapter
            .refund("GPA.1234", RefundAmount::Full)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.status, ProviderStatus::Refunded);
        assert!(gateway.requests()[0].url.contains("GPA.1234:refund"));
    }

    #[test]
    fn renewal_notification_maps_to_invoice_paid() {
        let (adapter, _) = adapter();
        let body = br#"{"subscriptionNotification":{"notificationType":2,"purchaseToken":"token_abc"}}"#.to_vec();
        let header =
            signature::sign(&body, chrono::Utc::now().timestamp(), "play_wh_secret").unwrap();

        let event = adapter.parse_webhook(&body, &header).unwrap();
        assert_eq!(event.kind, EventKind::InvoicePaid);
        assert_eq!(event.external_ref, "token_abc");
    }

    #[test]
    fn unknown_notification_is_unrecognized() {
        let (adapter, _) = adapter();
        let body = br#"{"testNotification":{"version":"1.0"}}"#.to_vec();
        let header =
            signature::sign(&body, chrono::Utc::now().timestamp(), "play_wh_secret").unwrap();
        assert!(matches!(
            adapter.parse_webhook(&body, &header),
            Err(ProviderError::UnrecognizedEvent(_))
        ));
    }
}

//! Manual bank transfer adapter.
//!
//! An offline backend: `charge` issues payment instructions and a `bt_`
//! reference, money arrives whenever the customer wires it, and the back
//! office reports settlement through a signed confirmation webhook. There is
//! no provider API to call, so no gateway is involved.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{
    ChargeSpec, EventKind, PaymentResult, ProviderAdapter, ProviderStatus, RefundAmount,
    WebhookEvent,
};
use crate::config::BankTransferConfig;
use crate::signature;
use crate::{ProviderError, ProviderName, Result};

pub struct BankTransferAdapter {
    config: BankTransferConfig,
}

impl BankTransferAdapter {
    pub fn new(config: BankTransferConfig) -> Self {
        Self { config }
    }

    fn new_reference() -> String {
        format!("bt_{}", uuid::Uuid::new_v4().simple().to_string()[..24].to_uppercase())
    }

    fn payment_instructions(&self, spec: &ChargeSpec, reference: &str) -> Value {
        json!({
            "reference": reference,
            "amount": spec.amount.to_string(),
            "currency": spec.currency,
            "bank_name": self.config.bank_name,
            "account_name": self.config.account_name,
            "account_number": self.config.account_number,
            "iban": self.config.iban,
            "swift_code": self.config.swift_code,
            "instructions": self.config.instructions,
        })
    }
}

#[async_trait]
impl ProviderAdapter for BankTransferAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::BankTransfer
    }

    fn display_name(&self) -> &'static str {
        "Bank Transfer"
    }

    fn is_configured(&self) -> bool {
        self.config.is_usable()
    }

    fn supports_refunds(&self) -> bool {
        false
    }

    async fn charge(&self, spec: &ChargeSpec) -> Result<PaymentResult> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(ProviderName::BankTransfer));
        }

        let reference = Self::new_reference();
        let instructions = self.payment_instructions(spec, &reference);

        tracing::info!(
            provider = %self.name(),
            reference = %reference,
            amount = %spec.amount,
            "issued bank transfer instructions"
        );

        // Settlement happens offline; the charge stays pending until the
        // back office confirms receipt of funds.
        Ok(PaymentResult::pending(reference, instructions))
    }

    async fn confirm(&self, external_ref: &str) -> Result<PaymentResult> {
        // Nothing to confirm programmatically. Report the reference back as
        // still awaiting funds.
        Ok(PaymentResult::pending(external_ref, Value::Null))
    }

    async fn refund(&self, _external_ref: &str, _amount: RefundAmount) -> Result<PaymentResult> {
        Err(ProviderError::Unsupported {
            provider: ProviderName::BankTransfer,
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
        let event = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = match event.as_str() {
            "transfer.received" => EventKind::ChargeSucceeded,
            "transfer.failed" => EventKind::ChargeFailed,
            // A wire sent back manually, recorded by the back office.
            "transfer.returned" => EventKind::RefundCompleted,
            _ => return Err(ProviderError::UnrecognizedEvent(event)),
        };

        let external_ref = payload
            .get("reference")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_data("webhook", "missing transfer reference"))?
            .to_string();

        Ok(WebhookEvent::new(
            ProviderName::BankTransfer,
            kind,
            external_ref,
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;

    fn adapter() -> BankTransferAdapter {
        BankTransferAdapter::new(BankTransferConfig::new("Example Bank", "bt_wh_secret"))
    }

    #[tokio::test]
    async fn charge_issues_pending_instructions() {
        let result = adapter()
            .charge(&ChargeSpec::new(Amount::from_cents(50_000), "EUR"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.status, ProviderStatus::Pending);
        let reference = result.external_ref.unwrap();
        assert!(reference.starts_with("bt_"));
        assert_eq!(result.raw["bank_name"], "Example Bank");
        assert_eq!(result.raw["amount"], "500.00");
    }

    #[tokio::test]
    async fn refund_is_a_typed_capability_gap() {
        let err = adapter()
            .refund("bt_ABC", RefundAmount::Full)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Unsupported {
                provider: ProviderName::BankTransfer,
                operation: "refund"
            }
        ));
    }

    #[test]
    fn received_webhook_maps_to_charge_succeeded() {
        let body = br#"{"event":"transfer.received","reference":"bt_ABC123"}"#.to_vec();
        let header =
            signature::sign(&body, chrono::Utc::now().timestamp(), "bt_wh_secret").unwrap();

        let event = adapter().parse_webhook(&body, &header).unwrap();
        assert_eq!(event.kind, EventKind::ChargeSucceeded);
        assert_eq!(event.external_ref, "bt_ABC123");
    }

    #[test]
    fn unsigned_webhook_is_rejected() {
        let body = br#"{"event":"transfer.received","reference":"bt_ABC123"}"#;
        assert!(matches!(
            adapter().parse_webhook(body, "t=1,v1=00"),
            Err(ProviderError::SignatureInvalid)
        ));
    }
}

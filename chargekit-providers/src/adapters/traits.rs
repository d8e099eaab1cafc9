//! The provider adapter trait and its value types.
//!
//! Every payment backend implements [`ProviderAdapter`]. Business failures
//! (declined card, invalid receipt) come back as unsuccessful
//! [`PaymentResult`]s; `Err` is reserved for configuration, capability, and
//! transport problems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{Amount, ProviderName, Result};

/// Parameters for initiating a charge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChargeSpec {
    pub amount: Amount,
    /// ISO 4217 currency code, upper case.
    pub currency: String,
    pub description: Option<String>,
    /// Free-form key/value metadata forwarded to the provider. IAP adapters
    /// read the receipt / purchase token from here.
    pub metadata: HashMap<String, String>,
    pub customer_email: Option<String>,
}

impl ChargeSpec {
    pub fn new(amount: Amount, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            description: None,
            metadata: HashMap::new(),
            customer_email: None,
        }
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

/// Normalized provider-side status of a charge or refund.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Accepted by the provider but not settled (two-phase flows, manual
    /// transfers awaiting funds).
    Pending,
    /// Money moved.
    Succeeded,
    Failed,
    Refunded,
}

/// Result of a single adapter call.
///
/// Transient value: the orchestrator folds it into the durable
/// payment-intent record, it is never persisted as-is.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentResult {
    pub success: bool,
    /// Provider-assigned reference (`pi_...`, `bt_...`, a store transaction
    /// id). Present on success and on failures that created a provider-side
    /// object.
    pub external_ref: Option<String>,
    pub status: ProviderStatus,
    /// Raw provider payload, kept opaque for audit.
    pub raw: Value,
    /// Human-readable failure reason when `success` is false.
    pub reason: Option<String>,
}

impl PaymentResult {
    /// A settled, successful call.
    pub fn succeeded(external_ref: impl Into<String>, raw: Value) -> Self {
        Self {
            success: true,
            external_ref: Some(external_ref.into()),
            status: ProviderStatus::Succeeded,
            raw,
            reason: None,
        }
    }

    /// A successful call that still awaits settlement or confirmation.
    pub fn pending(external_ref: impl Into<String>, raw: Value) -> Self {
        Self {
            success: true,
            external_ref: Some(external_ref.into()),
            status: ProviderStatus::Pending,
            raw,
            reason: None,
        }
    }

    /// A business failure with a caller-visible reason.
    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            external_ref: None,
            status: ProviderStatus::Failed,
            raw: Value::Null,
            reason: Some(reason.into()),
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// Canonical classification of an asynchronous provider notification.
///
/// This is the complete vocabulary reconciliation understands. Adapters map
/// provider-specific event strings onto it and fail with
/// `ProviderError::UnrecognizedEvent` for anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ChargeSucceeded,
    ChargeFailed,
    InvoicePaid,
    InvoiceFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    RefundCompleted,
    RefundFailed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ChargeSucceeded => "charge-succeeded",
            Self::ChargeFailed => "charge-failed",
            Self::InvoicePaid => "invoice-paid",
            Self::InvoiceFailed => "invoice-failed",
            Self::SubscriptionCreated => "subscription-created",
            Self::SubscriptionUpdated => "subscription-updated",
            Self::SubscriptionCancelled => "subscription-cancelled",
            Self::RefundCompleted => "refund-completed",
            Self::RefundFailed => "refund-failed",
        };
        write!(f, "{s}")
    }
}

/// A verified, canonicalized webhook notification.
///
/// Owned by the dispatcher for one reconciliation pass, then discarded; the
/// durable record is the payment intent it mutates plus the webhook log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub kind: EventKind,
    /// Provider reference linking back to a payment intent.
    pub external_ref: String,
    pub raw: Value,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(provider: ProviderName, kind: EventKind, external_ref: impl Into<String>, raw: Value) -> Self {
        Self {
            provider,
            kind,
            external_ref: external_ref.into(),
            raw,
            received_at: Utc::now(),
        }
    }
}

/// How much of a charge to refund.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefundAmount {
    Full,
    Partial(Amount),
}

/// One payment backend.
///
/// Adapters are stateless aside from their configuration and are shared
/// read-only across concurrent callers. Each adapter owns its credentials
/// and its webhook verification exclusively; nothing provider-specific leaks
/// past `parse_webhook`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> ProviderName;

    fn display_name(&self) -> &'static str;

    /// Whether credentials and configuration are present.
    fn is_configured(&self) -> bool;

    /// Whether the backend can issue refunds programmatically.
    fn supports_refunds(&self) -> bool;

    /// Initiate a charge.
    ///
    /// Declines and other ordinary business failures are reported as
    /// `PaymentResult { success: false, .. }`, never as `Err`.
    async fn charge(&self, spec: &ChargeSpec) -> Result<PaymentResult>;

    /// Confirm a previously created charge.
    ///
    /// Providers that settle synchronously return a no-op success.
    async fn confirm(&self, external_ref: &str) -> Result<PaymentResult>;

    /// Refund a settled charge, fully or partially.
    ///
    /// Fails with `ProviderError::Unsupported` when the backend has no
    /// programmatic refund path.
    async fn refund(&self, external_ref: &str, amount: RefundAmount) -> Result<PaymentResult>;

    /// Verify and canonicalize an inbound webhook delivery.
    fn parse_webhook(&self, raw_body: &[u8], signature_header: &str) -> Result<WebhookEvent>;
}

//! Error types for provider operations.

use crate::ProviderName;

/// Errors surfaced by adapters, the registry, and the manager.
///
/// Ordinary business failures (a declined card, an invalid receipt) are NOT
/// errors: adapters report them as unsuccessful
/// [`PaymentResult`](crate::PaymentResult)s so callers can show the reason to
/// the user. These variants cover configuration, capability, and transport
/// problems.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The named provider is unknown to the registry or administratively
    /// disabled.
    #[error("provider not configured: {0}")]
    NotConfigured(ProviderName),

    /// An adapter call exceeded the manager's ceiling.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Webhook signature did not verify against the configured secret.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// The webhook payload's event type has no canonical mapping. Callers
    /// should ack the provider and move on; this is not a fault.
    #[error("unrecognized webhook event kind: {0}")]
    UnrecognizedEvent(String),

    /// The provider cannot perform this operation at all (e.g. a manual
    /// bank transfer cannot be refunded programmatically).
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: ProviderName,
        operation: &'static str,
    },

    /// Network-layer failure talking to the provider.
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A request parameter was invalid before any call was made.
    #[error("invalid {field}: {reason}")]
    InvalidData { field: &'static str, reason: String },
}

impl ProviderError {
    /// Create a transport error from any error type.
    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        Self::Transport(err.to_string())
    }

    /// Create an invalid data error.
    pub fn invalid_data(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            field,
            reason: reason.into(),
        }
    }

    /// True when the failure came from the wire rather than from the request
    /// itself, and a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_provider() {
        let err = ProviderError::Unsupported {
            provider: ProviderName::BankTransfer,
            operation: "refund",
        };
        assert_eq!(err.to_string(), "bank_transfer does not support refund");
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(ProviderError::Timeout {
            operation: "charge",
            timeout_ms: 30_000
        }
        .is_transient());
        assert!(!ProviderError::SignatureInvalid.is_transient());
    }
}

//! Chargekit provider layer.
//!
//! This crate intentionally stays stateless and delegates HTTP transport to
//! callers through trait-based dependency injection.
//!
//! # Features
//!
//! - **Provider Adapters**: one adapter per payment backend (card, wallet,
//!   bank transfer, Apple IAP, Google Play) behind a single trait
//! - **Registry/Factory**: explicit configuration decides which providers
//!   are enabled; adapters are shared, read-only instances
//! - **Manager Facade**: uniform timeout ceiling around every adapter call,
//!   transport failures normalized into failed results
//!
//! # Example
//!
//! ```ignore
//! use chargekit_providers::{ProviderName, ProvidersConfig, ProviderRegistry, PaymentManager};
//! use chargekit_providers::adapters::ChargeSpec;
//! use chargekit_providers::Amount;
//!
//! let registry = ProviderRegistry::from_config(config, gateway);
//! let manager = PaymentManager::new(registry.into());
//!
//! let result = manager
//!     .create_payment(ProviderName::Card, &ChargeSpec::new(Amount::from_cents(2999), "USD"))
//!     .await?;
//! assert!(result.success);
//! ```

use std::fmt;

pub mod adapters;
pub mod amount;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod manager;
pub mod registry;
pub mod signature;

/// Test utilities (scripted gateway).
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapters::{
    ChargeSpec, EventKind, PaymentResult, ProviderAdapter, ProviderStatus, RefundAmount,
    WebhookEvent,
};
pub use amount::Amount;
pub use config::ProvidersConfig;
pub use errors::ProviderError;
pub use gateway::ProviderGateway;
pub use manager::PaymentManager;
pub use registry::ProviderRegistry;

/// Common result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Identifier for a payment provider backend.
///
/// The provider set is small and known, so this is a closed enumeration
/// rather than an open registration namespace. Adding a backend means adding
/// a variant and an adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    /// Card processor with a two-phase intent/confirm flow.
    Card,
    /// Wallet processor (single-phase order capture).
    Wallet,
    /// Manual bank transfer, settled by offline reconciliation.
    BankTransfer,
    /// Apple in-app purchase receipt validation.
    AppleIap,
    /// Google Play purchase-token validation.
    GooglePlay,
}

impl ProviderName {
    /// Get the provider name as a string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Wallet => "wallet",
            Self::BankTransfer => "bank_transfer",
            Self::AppleIap => "apple_iap",
            Self::GooglePlay => "google_play",
        }
    }

    /// All provider variants, in declaration order.
    pub const ALL: [ProviderName; 5] = [
        Self::Card,
        Self::Wallet,
        Self::BankTransfer,
        Self::AppleIap,
        Self::GooglePlay,
    ];
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderName {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "card" => Ok(Self::Card),
            "wallet" => Ok(Self::Wallet),
            "bank_transfer" => Ok(Self::BankTransfer),
            "apple_iap" => Ok(Self::AppleIap),
            "google_play" => Ok(Self::GooglePlay),
            other => Err(ProviderError::invalid_data(
                "provider",
                format!("unknown provider name: {other}"),
            )),
        }
    }
}

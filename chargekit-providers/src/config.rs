//! Configuration types for payment providers.
//!
//! The registry is constructed from an explicit [`ProvidersConfig`] rather
//! than ambient settings, so a test can build a registry with an arbitrary
//! provider subset.

use serde::{Deserialize, Serialize};

use crate::ProviderName;

fn default_timeout() -> u64 {
    30
}

fn default_tolerance() -> i64 {
    300
}

fn default_enabled() -> bool {
    true
}

/// Top-level provider configuration.
///
/// A provider with no config section (or `enabled = false`) is not
/// registered and resolves to `ProviderError::NotConfigured`. Declaration
/// order of the fields is the enumeration order reported by the registry,
/// except that `default_provider` is always listed first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Provider used when the caller does not name one.
    pub default_provider: Option<ProviderName>,

    /// Adapter call ceiling in seconds, applied by the manager.
    #[serde(default = "default_timeout")]
    pub call_timeout_secs: u64,

    pub card: Option<CardConfig>,
    pub wallet: Option<WalletConfig>,
    pub bank_transfer: Option<BankTransferConfig>,
    pub apple_iap: Option<AppleIapConfig>,
    pub google_play: Option<GooglePlayConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            call_timeout_secs: default_timeout(),
            card: None,
            wallet: None,
            bank_transfer: None,
            apple_iap: None,
            google_play: None,
        }
    }
}

/// Card processor credentials.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardConfig {
    /// API secret key (e.g. `sk_live_...`).
    pub secret_key: String,
    /// Webhook signing secret (e.g. `whsec_...`).
    pub webhook_secret: String,
    /// Replay tolerance for webhook signatures, in seconds.
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl CardConfig {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            signature_tolerance_secs: default_tolerance(),
            enabled: true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.enabled && !self.secret_key.is_empty()
    }
}

/// Wallet processor credentials.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Webhook signing secret shared with the wallet provider.
    pub webhook_secret: String,
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl WalletConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            webhook_secret: webhook_secret.into(),
            signature_tolerance_secs: default_tolerance(),
            enabled: true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.enabled && !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Manual bank transfer details shown to the payer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BankTransferConfig {
    pub bank_name: String,
    pub account_name: String,
    #[serde(default)]
    pub account_number: String,
    #[serde(default)]
    pub iban: String,
    #[serde(default)]
    pub swift_code: String,
    /// Extra instructions appended to the transfer reference.
    #[serde(default)]
    pub instructions: String,
    /// Secret used to sign manual-confirmation webhooks from the back office.
    pub webhook_secret: String,
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl BankTransferConfig {
    pub fn new(bank_name: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            bank_name: bank_name.into(),
            account_name: String::new(),
            account_number: String::new(),
            iban: String::new(),
            swift_code: String::new(),
            instructions: String::new(),
            webhook_secret: webhook_secret.into(),
            signature_tolerance_secs: default_tolerance(),
            enabled: true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bank_name.is_empty()
    }
}

/// Apple App Store receipt validation credentials.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppleIapConfig {
    pub bundle_id: String,
    /// Shared secret for the verifyReceipt endpoint.
    pub shared_secret: String,
    /// Validate against the sandbox environment.
    #[serde(default)]
    pub sandbox: bool,
    /// Secret used to authenticate App Store server notifications.
    pub webhook_secret: String,
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AppleIapConfig {
    pub fn new(bundle_id: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            shared_secret: shared_secret.into(),
            sandbox: false,
            webhook_secret: String::new(),
            signature_tolerance_secs: default_tolerance(),
            enabled: true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bundle_id.is_empty() && !self.shared_secret.is_empty()
    }
}

/// Google Play purchase validation credentials.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GooglePlayConfig {
    pub package_name: String,
    /// Service-account credential used for the Android Publisher API.
    pub service_account_key: String,
    /// Secret used to authenticate real-time developer notifications.
    pub webhook_secret: String,
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl GooglePlayConfig {
    pub fn new(package_name: impl Into<String>, service_account_key: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            service_account_key: service_account_key.into(),
            webhook_secret: String::new(),
            signature_tolerance_secs: default_tolerance(),
            enabled: true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.enabled && !self.package_name.is_empty() && !self.service_account_key.is_empty()
    }
}

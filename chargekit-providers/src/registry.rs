//! Provider registry / factory.
//!
//! The registry is built once from an explicit [`ProvidersConfig`] and is
//! read-only afterwards: adapter instances are shared `Arc`s, safe across
//! concurrent callers. Which providers exist is decided here and nowhere
//! else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{
    AppleIapAdapter, BankTransferAdapter, CardAdapter, GooglePlayAdapter, ProviderAdapter,
    WalletAdapter,
};
use crate::config::ProvidersConfig;
use crate::gateway::ProviderGateway;
use crate::{ProviderError, ProviderName, Result};

pub struct ProviderRegistry {
    adapters: HashMap<ProviderName, Arc<dyn ProviderAdapter>>,
    /// Enumeration order: configured default first, then declaration order.
    order: Vec<ProviderName>,
    default_provider: Option<ProviderName>,
    call_timeout: Duration,
}

impl ProviderRegistry {
    /// Build a registry from configuration.
    ///
    /// Providers without a usable config section are simply absent; they
    /// resolve to [`ProviderError::NotConfigured`]. A misconfigured entry is
    /// logged rather than silently dropped.
    pub fn from_config(config: ProvidersConfig, gateway: Arc<dyn ProviderGateway>) -> Self {
        let mut adapters: HashMap<ProviderName, Arc<dyn ProviderAdapter>> = HashMap::new();

        if let Some(card) = config.card {
            if card.is_usable() {
                adapters.insert(
                    ProviderName::Card,
                    Arc::new(CardAdapter::new(card, gateway.clone())),
                );
            } else {
                tracing::warn!(provider = %ProviderName::Card, "provider config present but not usable");
            }
        }
        if let Some(wallet) = config.wallet {
            if wallet.is_usable() {
                adapters.insert(
                    ProviderName::Wallet,
                    Arc::new(WalletAdapter::new(wallet, gateway.clone())),
                );
            } else {
                tracing::warn!(provider = %ProviderName::Wallet, "provider config present but not usable");
            }
        }
        if let Some(bank) = config.bank_transfer {
            if bank.is_usable() {
                adapters.insert(
                    ProviderName::BankTransfer,
                    Arc::new(BankTransferAdapter::new(bank)),
                );
            } else {
                tracing::warn!(provider = %ProviderName::BankTransfer, "provider config present but not usable");
            }
        }
        if let Some(apple) = config.apple_iap {
            if apple.is_usable() {
                adapters.insert(
                    ProviderName::AppleIap,
                    Arc::new(AppleIapAdapter::new(apple, gateway.clone())),
                );
            } else {
                tracing::warn!(provider = %ProviderName::AppleIap, "provider config present but not usable");
            }
        }
        if let Some(play) = config.google_play {
            if play.is_usable() {
                adapters.insert(
                    ProviderName::GooglePlay,
                    Arc::new(GooglePlayAdapter::new(play, gateway)),
                );
            } else {
                tracing::warn!(provider = %ProviderName::GooglePlay, "provider config present but not usable");
            }
        }

        // Stable enumeration order: the default provider leads so callers
        // listing providers always see the preferred one first.
        let mut order: Vec<ProviderName> = Vec::with_capacity(adapters.len());
        if let Some(default) = config.default_provider {
            if adapters.contains_key(&default) {
                order.push(default);
            }
        }
        for name in ProviderName::ALL {
            if adapters.contains_key(&name) && !order.contains(&name) {
                order.push(name);
            }
        }

        Self {
            adapters,
            order,
            default_provider: config.default_provider,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Resolve a provider name to its adapter.
    ///
    /// Repeated calls return the same shared instance.
    pub fn resolve(&self, name: ProviderName) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&name)
            .cloned()
            .ok_or(ProviderError::NotConfigured(name))
    }

    /// Enabled provider names in stable enumeration order.
    pub fn enabled(&self) -> Vec<ProviderName> {
        self.order.clone()
    }

    pub fn is_enabled(&self, name: ProviderName) -> bool {
        self.adapters.contains_key(&name)
    }

    /// The provider used when a caller does not name one.
    pub fn default_provider(&self) -> Option<ProviderName> {
        self.default_provider.filter(|name| self.is_enabled(*name))
    }

    /// Adapter call ceiling configured for this deployment.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

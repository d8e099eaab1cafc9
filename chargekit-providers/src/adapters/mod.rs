//! Payment provider adapters.
//!
//! One module per backend. Adapters share the [`ProviderAdapter`] trait and
//! nothing else; credentials, wire formats, and webhook quirks stay inside
//! the owning module.

pub mod apple_iap;
pub mod bank_transfer;
pub mod card;
pub mod google_play;
mod traits;
pub mod wallet;

pub use apple_iap::AppleIapAdapter;
pub use bank_transfer::BankTransferAdapter;
pub use card::CardAdapter;
pub use google_play::GooglePlayAdapter;
pub use traits::{
    ChargeSpec, EventKind, PaymentResult, ProviderAdapter, ProviderStatus, RefundAmount,
    WebhookEvent,
};
pub use wallet::WalletAdapter;

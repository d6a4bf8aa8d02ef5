//! Payment-provider clients.
//!
//! Each provider sits behind a trait so the HTTP handlers can be driven with
//! stub gateways in tests. Provider payloads are normalized into
//! [`ProviderEvent`] before anything reaches the ledger.

pub mod paypal;
pub mod stripe;

use std::sync::Arc;

use crate::models::PaymentEventKind;

pub use paypal::{PayPalApi, PayPalClient};
pub use stripe::{StripeApi, StripeClient};

/// A verified provider notification, reduced to what the ledger acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub donation_id: String,
    pub kind: PaymentEventKind,
    pub provider_reference: Option<String>,
}

#[derive(Clone)]
pub struct PaymentGateways {
    pub stripe: Arc<dyn StripeApi>,
    pub paypal: Arc<dyn PayPalApi>,
}

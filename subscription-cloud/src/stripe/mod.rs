//! Stripe integration via REST API (no SDK dependency)
//!
//! [`ProviderGateway`] is the seam between the billing engine and the remote
//! provider. [`client::StripeGateway`] talks to the real API; tests use the
//! scripted gateway in `mock`.

pub mod client;
pub mod event;
pub mod signature;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use shared::billing::{BillingCycle, Currency, Plan};

pub use client::StripeGateway;
pub use event::{
    CheckoutSessionObject, EventKind, InvoiceObject, SubscriptionObject, UpcomingInvoiceObject,
    WebhookEvent,
};
pub use signature::SignatureError;

/// Remote provider failure
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("provider call timed out")]
    Timeout,
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Parameters of a subscription-mode checkout session
///
/// Everything under `metadata` comes back verbatim on the
/// `checkout.session.completed` event.
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub tenant_id: &'a str,
    pub customer_id: &'a str,
    pub price_id: &'a str,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    pub currency: Currency,
    pub trial_days: u32,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

/// Created checkout session
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Capability-scoped client for the external billing provider
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn create_customer(&self, tenant_id: &str) -> Result<String, ProviderError>;

    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, ProviderError>;

    /// Provider-hosted management portal, returns its URL
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, ProviderError>;

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, ProviderError>;

    /// Cancel now, or flag the subscription to end with the current period
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<SubscriptionObject, ProviderError>;

    /// Undo a pending period-end cancellation
    async fn resume_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, ProviderError>;

    /// Swap the subscription item's price, prorating on the provider side
    async fn change_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<SubscriptionObject, ProviderError>;

    /// Most recent invoices of a customer, newest first
    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<InvoiceObject>, ProviderError>;

    /// Next invoice the provider will issue; `None` when nothing is scheduled
    async fn upcoming_invoice(
        &self,
        customer_id: &str,
    ) -> Result<Option<UpcomingInvoiceObject>, ProviderError>;

    /// Authenticate a raw webhook payload against its signature header
    fn verify_webhook(&self, payload: &[u8], signature_header: &str)
    -> Result<(), SignatureError>;
}

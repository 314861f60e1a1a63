//! Billing service configuration

use std::time::Duration;

use crate::catalog::PriceIds;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stripe credentials and client tuning, injected into the gateway at construction
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// API base URL (overridable for stripe-mock)
    pub api_base: String,
    /// Upper bound for every remote call
    pub timeout: Duration,
    /// Maximum accepted age of a webhook signature timestamp
    pub webhook_tolerance_secs: i64,
}

/// Billing service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// HTTP port
    pub http_port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    pub stripe: StripeConfig,
    /// Trial window attached to every checkout session
    pub trial_days: u32,
    /// Console base URL, used for checkout and portal redirects
    pub frontend_host: String,
    /// Default page size of the invoice listing
    pub invoice_page_size: i64,
    /// Provider price ids per plan / cycle / currency
    pub price_ids: PriceIds,
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
        std::env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let stripe = StripeConfig {
            secret_key: Self::require_secret("STRIPE_SECRET_KEY", &environment)?,
            webhook_secret: Self::require_secret("STRIPE_WEBHOOK_SECRET", &environment)?,
            api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".into()),
            timeout: Duration::from_secs(Self::parsed("PROVIDER_TIMEOUT_SECS", 10)),
            webhook_tolerance_secs: Self::parsed("WEBHOOK_TOLERANCE_SECS", 300),
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            http_port: Self::parsed("HTTP_PORT", 8080),
            environment,
            stripe,
            trial_days: Self::parsed("TRIAL_DAYS", 3),
            frontend_host: std::env::var("FRONTEND_HOST")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            invoice_page_size: Self::parsed("INVOICE_PAGE_SIZE", 20),
            price_ids: PriceIds::from_lookup(|name| std::env::var(name).ok()),
        })
    }

    pub fn checkout_success_url(&self) -> String {
        format!("{}/company-admin/subscription/success", self.frontend_host)
    }

    pub fn checkout_cancel_url(&self) -> String {
        format!("{}/company-admin/subscription/cancel", self.frontend_host)
    }

    pub fn portal_return_url(&self) -> String {
        format!("{}/company-admin/subscription", self.frontend_host)
    }
}

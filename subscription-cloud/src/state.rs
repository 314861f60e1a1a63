//! Application state for subscription-cloud

use std::sync::Arc;

use sqlx::PgPool;

use crate::billing::{EngineSettings, SubscriptionEngine, WebhookReconciler};
use crate::catalog::PlanCatalog;
use crate::config::Config;
use crate::db::PgStore;
use crate::stripe::StripeGateway;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Subscription lifecycle and entitlement queries
    pub engine: SubscriptionEngine,
    /// Stripe webhook reconciliation
    pub webhooks: WebhookReconciler,
}

impl AppState {
    /// Connect to PostgreSQL, run migrations and wire the Stripe gateway
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let pool = PgPool::connect(&config.database_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        let store = Arc::new(PgStore::new(pool));
        let gateway = Arc::new(StripeGateway::new(&config.stripe)?);
        let catalog = PlanCatalog::new(config.price_ids.clone(), config.trial_days);

        let engine = SubscriptionEngine::new(
            store.clone(),
            gateway,
            store,
            catalog,
            EngineSettings::from_config(config),
        );
        Ok(Self::from_engine(engine))
    }

    pub fn from_engine(engine: SubscriptionEngine) -> Self {
        Self {
            webhooks: WebhookReconciler::new(engine.clone()),
            engine,
        }
    }
}

//! PostgreSQL store

use async_trait::async_trait;
use sqlx::PgPool;

use super::{
    EmployeeDirectory, Invoice, PurgeReport, StoreError, StoreResult, Subscription,
    SubscriptionStore, UpsertOutcome, customers, invoices, subscriptions, webhook_events,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Unique violations are lost races (one live subscription per tenant)
fn map_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict("tenant already has a live subscription")
        }
        _ => StoreError::Database(e),
    }
}

fn convert(row: Option<subscriptions::SubscriptionRow>) -> StoreResult<Option<Subscription>> {
    row.map(Subscription::try_from).transpose()
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn find_active(&self, tenant_id: &str) -> StoreResult<Option<Subscription>> {
        convert(subscriptions::find_active(&self.pool, tenant_id).await?)
    }

    async fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        convert(
            subscriptions::find_by_provider_subscription(&self.pool, provider_subscription_id)
                .await?,
        )
    }

    async fn find_current_by_customer(
        &self,
        provider_customer_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        convert(subscriptions::find_current_by_customer(&self.pool, provider_customer_id).await?)
    }

    async fn find_customer_id(&self, tenant_id: &str) -> StoreResult<Option<String>> {
        if let Some(id) = subscriptions::find_any_customer_id(&self.pool, tenant_id).await? {
            return Ok(Some(id));
        }
        Ok(customers::find(&self.pool, tenant_id).await?)
    }

    async fn save_customer_id(
        &self,
        tenant_id: &str,
        provider_customer_id: &str,
        now: i64,
    ) -> StoreResult<()> {
        customers::upsert(&self.pool, tenant_id, provider_customer_id, now).await?;
        Ok(())
    }

    async fn insert(&self, sub: &Subscription) -> StoreResult<()> {
        subscriptions::insert(&self.pool, sub)
            .await
            .map_err(map_unique)
    }

    async fn update(&self, sub: &Subscription) -> StoreResult<bool> {
        let affected = subscriptions::update_versioned(&self.pool, sub)
            .await
            .map_err(map_unique)?;
        Ok(affected == 1)
    }

    async fn supersede_and_insert(
        &self,
        new: &Subscription,
        now: i64,
    ) -> StoreResult<Vec<Subscription>> {
        let mut tx = self.pool.begin().await?;
        let superseded = subscriptions::cancel_current(&mut *tx, &new.tenant_id, now).await?;
        subscriptions::insert(&mut *tx, new)
            .await
            .map_err(map_unique)?;
        tx.commit().await?;

        superseded.into_iter().map(Subscription::try_from).collect()
    }

    async fn upsert_invoice(&self, invoice: &Invoice) -> StoreResult<UpsertOutcome> {
        Ok(invoices::upsert(&self.pool, invoice).await?)
    }

    async fn list_invoices(&self, tenant_id: &str, limit: i64) -> StoreResult<Vec<Invoice>> {
        invoices::list_by_tenant(&self.pool, tenant_id, limit)
            .await?
            .into_iter()
            .map(Invoice::try_from)
            .collect()
    }

    async fn list_subscriptions(&self, tenant_id: &str) -> StoreResult<Vec<Subscription>> {
        subscriptions::list_by_tenant(&self.pool, tenant_id)
            .await?
            .into_iter()
            .map(Subscription::try_from)
            .collect()
    }

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        Ok(webhook_events::exists(&self.pool, event_id).await?)
    }

    async fn mark_event_processed(
        &self,
        event_id: &str,
        event_type: &str,
        now: i64,
    ) -> StoreResult<()> {
        webhook_events::record(&self.pool, event_id, event_type, now).await?;
        Ok(())
    }

    async fn purge_tenant(&self, tenant_id: &str) -> StoreResult<PurgeReport> {
        // Invoices before subscriptions: ON DELETE SET NULL would orphan them
        let mut tx = self.pool.begin().await?;
        let invoice_rows = invoices::delete_by_tenant(&mut *tx, tenant_id).await?;
        let subscription_rows = subscriptions::delete_by_tenant(&mut *tx, tenant_id).await?;
        let customer_rows = customers::delete(&mut *tx, tenant_id).await?;
        tx.commit().await?;

        Ok(PurgeReport {
            subscriptions: subscription_rows,
            invoices: invoice_rows,
            customers: customer_rows,
        })
    }
}

#[async_trait]
impl EmployeeDirectory for PgStore {
    async fn employee_count(&self, tenant_id: &str) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM employees WHERE company_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

use rust_decimal::Decimal;
use shared::billing::{BillingCycle, Currency, Plan, SubscriptionStatus};
use sqlx::{PgExecutor, PgPool};

use super::{StoreError, Subscription, parse_enum};

const COLUMNS: &str = "id, tenant_id, plan, billing_cycle, status, currency, amount,
    provider_customer_id, provider_subscription_id, provider_price_id,
    trial_end, current_period_start, current_period_end, cancel_at, canceled_at, ended_at,
    started_at, created_at, updated_at, last_event_at, version";

#[derive(sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: i64,
    pub tenant_id: String,
    pub plan: String,
    pub billing_cycle: String,
    pub status: String,
    pub currency: String,
    pub amount: Decimal,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_price_id: Option<String>,
    pub trial_end: Option<i64>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub started_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_event_at: Option<i64>,
    pub version: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            plan: parse_enum(&row.plan, "plan", Plan::from_db)?,
            billing_cycle: parse_enum(&row.billing_cycle, "billing_cycle", BillingCycle::from_db)?,
            status: parse_enum(&row.status, "status", SubscriptionStatus::from_db)?,
            currency: parse_enum(&row.currency, "currency", Currency::from_code)?,
            id: row.id,
            tenant_id: row.tenant_id,
            amount: row.amount,
            provider_customer_id: row.provider_customer_id,
            provider_subscription_id: row.provider_subscription_id,
            provider_price_id: row.provider_price_id,
            trial_end: row.trial_end,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancel_at: row.cancel_at,
            canceled_at: row.canceled_at,
            ended_at: row.ended_at,
            started_at: row.started_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_event_at: row.last_event_at,
            version: row.version,
        })
    }
}

pub async fn find_active(
    pool: &PgPool,
    tenant_id: &str,
) -> Result<Option<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(&format!(
        "SELECT {COLUMNS} FROM subscriptions
         WHERE tenant_id = $1 AND status IN ('active', 'trialing')
         ORDER BY created_at DESC
         LIMIT 1"
    ))
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_provider_subscription(
    pool: &PgPool,
    provider_subscription_id: &str,
) -> Result<Option<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(&format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE provider_subscription_id = $1"
    ))
    .bind(provider_subscription_id)
    .fetch_optional(pool)
    .await
}

pub async fn find_current_by_customer(
    pool: &PgPool,
    provider_customer_id: &str,
) -> Result<Option<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(&format!(
        "SELECT {COLUMNS} FROM subscriptions
         WHERE provider_customer_id = $1 AND status IN ('active', 'trialing', 'past_due')
         ORDER BY created_at DESC
         LIMIT 1"
    ))
    .bind(provider_customer_id)
    .fetch_optional(pool)
    .await
}

/// Customer id from any row of the tenant, canceled ones included
pub async fn find_any_customer_id(
    pool: &PgPool,
    tenant_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT provider_customer_id FROM subscriptions
         WHERE tenant_id = $1 AND provider_customer_id IS NOT NULL
         ORDER BY created_at DESC
         LIMIT 1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.0))
}

pub async fn list_by_tenant(
    pool: &PgPool,
    tenant_id: &str,
) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(&format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE tenant_id = $1 ORDER BY created_at DESC"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}

pub async fn insert(exec: impl PgExecutor<'_>, sub: &Subscription) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO subscriptions ({COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, $19, $20, $21)"
    ))
    .bind(sub.id)
    .bind(&sub.tenant_id)
    .bind(sub.plan.as_db())
    .bind(sub.billing_cycle.as_db())
    .bind(sub.status.as_db())
    .bind(sub.currency.code())
    .bind(sub.amount)
    .bind(&sub.provider_customer_id)
    .bind(&sub.provider_subscription_id)
    .bind(&sub.provider_price_id)
    .bind(sub.trial_end)
    .bind(sub.current_period_start)
    .bind(sub.current_period_end)
    .bind(sub.cancel_at)
    .bind(sub.canceled_at)
    .bind(sub.ended_at)
    .bind(sub.started_at)
    .bind(sub.created_at)
    .bind(sub.updated_at)
    .bind(sub.last_event_at)
    .bind(sub.version)
    .execute(exec)
    .await?;
    Ok(())
}

/// Versioned update, returns rows affected (0 = version moved)
pub async fn update_versioned(
    exec: impl PgExecutor<'_>,
    sub: &Subscription,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE subscriptions SET
            plan = $3, billing_cycle = $4, status = $5, currency = $6, amount = $7,
            provider_customer_id = $8, provider_subscription_id = $9, provider_price_id = $10,
            trial_end = $11, current_period_start = $12, current_period_end = $13,
            cancel_at = $14, canceled_at = $15, ended_at = $16,
            updated_at = $17, last_event_at = $18, version = version + 1
         WHERE id = $1 AND version = $2",
    )
    .bind(sub.id)
    .bind(sub.version)
    .bind(sub.plan.as_db())
    .bind(sub.billing_cycle.as_db())
    .bind(sub.status.as_db())
    .bind(sub.currency.code())
    .bind(sub.amount)
    .bind(&sub.provider_customer_id)
    .bind(&sub.provider_subscription_id)
    .bind(&sub.provider_price_id)
    .bind(sub.trial_end)
    .bind(sub.current_period_start)
    .bind(sub.current_period_end)
    .bind(sub.cancel_at)
    .bind(sub.canceled_at)
    .bind(sub.ended_at)
    .bind(sub.updated_at)
    .bind(sub.last_event_at)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

/// Cancel every current row of the tenant, returning them as they are after the update
pub async fn cancel_current(
    exec: impl PgExecutor<'_>,
    tenant_id: &str,
    now: i64,
) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(&format!(
        "UPDATE subscriptions
         SET status = 'canceled', canceled_at = $2, updated_at = $2, version = version + 1
         WHERE tenant_id = $1 AND status IN ('active', 'trialing', 'past_due')
         RETURNING {COLUMNS}"
    ))
    .bind(tenant_id)
    .bind(now)
    .fetch_all(exec)
    .await
}

pub async fn delete_by_tenant(exec: impl PgExecutor<'_>, tenant_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE tenant_id = $1")
        .bind(tenant_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

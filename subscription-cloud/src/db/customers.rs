//! Tenant -> provider customer mapping
//!
//! Written as soon as a customer is created for checkout, so an abandoned
//! checkout does not mint a second customer on retry.

use sqlx::{PgExecutor, PgPool};

pub async fn find(pool: &PgPool, tenant_id: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT provider_customer_id FROM billing_customers WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.0))
}

pub async fn upsert(
    pool: &PgPool,
    tenant_id: &str,
    provider_customer_id: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO billing_customers (tenant_id, provider_customer_id, created_at, updated_at)
         VALUES ($1, $2, $3, $3)
         ON CONFLICT (tenant_id) DO UPDATE SET
            provider_customer_id = EXCLUDED.provider_customer_id,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(tenant_id)
    .bind(provider_customer_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(exec: impl PgExecutor<'_>, tenant_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM billing_customers WHERE tenant_id = $1")
        .bind(tenant_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

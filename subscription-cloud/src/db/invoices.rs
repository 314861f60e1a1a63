use rust_decimal::Decimal;
use shared::billing::{Currency, InvoiceStatus};
use sqlx::{PgExecutor, PgPool};

use super::{Invoice, StoreError, UpsertOutcome, parse_enum};

#[derive(sqlx::FromRow)]
pub struct InvoiceRow {
    pub id: i64,
    pub tenant_id: String,
    pub subscription_id: Option<i64>,
    pub provider_invoice_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub invoice_pdf_url: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub paid_at: Option<i64>,
    pub due_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = StoreError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            currency: parse_enum(&row.currency, "currency", Currency::from_code)?,
            status: parse_enum(&row.status, "invoice status", InvoiceStatus::from_db)?,
            id: row.id,
            tenant_id: row.tenant_id,
            subscription_id: row.subscription_id,
            provider_invoice_id: row.provider_invoice_id,
            amount: row.amount,
            invoice_pdf_url: row.invoice_pdf_url,
            hosted_invoice_url: row.hosted_invoice_url,
            paid_at: row.paid_at,
            due_date: row.due_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert, or update when content differs and the stored row is not paid yet.
///
/// `RETURNING (xmax = 0)` is true for a fresh insert; no row back means the
/// conflict branch was filtered out by its WHERE clause.
pub async fn upsert(pool: &PgPool, inv: &Invoice) -> Result<UpsertOutcome, sqlx::Error> {
    let row: Option<(bool,)> = sqlx::query_as(
        "INSERT INTO invoices (id, tenant_id, subscription_id, provider_invoice_id, amount, currency,
            status, invoice_pdf_url, hosted_invoice_url, paid_at, due_date, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
         ON CONFLICT (provider_invoice_id) DO UPDATE SET
            subscription_id = EXCLUDED.subscription_id,
            amount = EXCLUDED.amount,
            currency = EXCLUDED.currency,
            status = EXCLUDED.status,
            invoice_pdf_url = EXCLUDED.invoice_pdf_url,
            hosted_invoice_url = EXCLUDED.hosted_invoice_url,
            paid_at = EXCLUDED.paid_at,
            due_date = EXCLUDED.due_date,
            updated_at = EXCLUDED.updated_at
         WHERE invoices.status <> 'paid'
           AND (invoices.subscription_id, invoices.amount, invoices.currency, invoices.status,
                invoices.invoice_pdf_url, invoices.hosted_invoice_url, invoices.paid_at,
                invoices.due_date)
               IS DISTINCT FROM
               (EXCLUDED.subscription_id, EXCLUDED.amount, EXCLUDED.currency, EXCLUDED.status,
                EXCLUDED.invoice_pdf_url, EXCLUDED.hosted_invoice_url, EXCLUDED.paid_at,
                EXCLUDED.due_date)
         RETURNING (xmax = 0)",
    )
    .bind(inv.id)
    .bind(&inv.tenant_id)
    .bind(inv.subscription_id)
    .bind(&inv.provider_invoice_id)
    .bind(inv.amount)
    .bind(inv.currency.code())
    .bind(inv.status.as_db())
    .bind(&inv.invoice_pdf_url)
    .bind(&inv.hosted_invoice_url)
    .bind(inv.paid_at)
    .bind(inv.due_date)
    .bind(inv.created_at)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some((true,)) => UpsertOutcome::Inserted,
        Some((false,)) => UpsertOutcome::Updated,
        None => UpsertOutcome::Unchanged,
    })
}

pub async fn list_by_tenant(
    pool: &PgPool,
    tenant_id: &str,
    limit: i64,
) -> Result<Vec<InvoiceRow>, sqlx::Error> {
    sqlx::query_as::<_, InvoiceRow>(
        "SELECT id, tenant_id, subscription_id, provider_invoice_id, amount, currency, status,
            invoice_pdf_url, hosted_invoice_url, paid_at, due_date, created_at, updated_at
         FROM invoices
         WHERE tenant_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2",
    )
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn delete_by_tenant(exec: impl PgExecutor<'_>, tenant_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM invoices WHERE tenant_id = $1")
        .bind(tenant_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

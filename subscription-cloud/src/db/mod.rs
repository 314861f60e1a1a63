//! Persistence boundary for subscriptions, invoices and processed webhook events
//!
//! [`SubscriptionStore`] is the only writer of subscription and invoice rows.
//! `PgStore` is the production implementation; `MemoryStore` keeps the same
//! constraints in process and drives the engine tests.

pub mod customers;
pub mod invoices;
pub mod memory;
pub mod postgres;
pub mod subscriptions;
pub mod webhook_events;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use shared::billing::{BillingCycle, Currency, InvoiceStatus, Plan, SubscriptionStatus};

pub use memory::{MemoryStore, StaticDirectory};
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// A persisted value no longer parses (e.g. an unknown plan string)
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// Unique index or version check rejected the write
    #[error("conflict: {0}")]
    Conflict(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One subscription row. Canceled rows are kept for history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub tenant_id: String,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub currency: Currency,
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
    /// Provider state is reflected up to this instant; older webhook events are stale
    pub last_event_at: Option<i64>,
    /// Optimistic concurrency counter, bumped by every update
    pub version: i64,
}

impl Subscription {
    /// Fresh free-plan row: active, no provider references
    pub fn free(tenant_id: &str, now: i64) -> Self {
        Self {
            id: shared::util::snowflake_id(),
            tenant_id: tenant_id.to_string(),
            plan: Plan::Free,
            billing_cycle: BillingCycle::None,
            status: SubscriptionStatus::Active,
            currency: Currency::Usd,
            amount: Decimal::ZERO,
            provider_customer_id: None,
            provider_subscription_id: None,
            provider_price_id: None,
            trial_end: None,
            current_period_start: Some(now),
            current_period_end: None,
            cancel_at: None,
            canceled_at: None,
            ended_at: None,
            started_at: now,
            created_at: now,
            updated_at: now,
            last_event_at: None,
            version: 0,
        }
    }

    /// Active or trialing
    pub fn is_active(&self) -> bool {
        self.status.is_live()
    }

    /// Backed by a provider subscription
    pub fn is_paid(&self) -> bool {
        self.provider_subscription_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: i64,
    pub tenant_id: String,
    pub subscription_id: Option<i64>,
    pub provider_invoice_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: InvoiceStatus,
    pub invoice_pdf_url: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub paid_at: Option<i64>,
    pub due_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Invoice {
    /// Same content, ignoring identity and bookkeeping timestamps
    pub fn same_content(&self, other: &Invoice) -> bool {
        self.tenant_id == other.tenant_id
            && self.subscription_id == other.subscription_id
            && self.amount == other.amount
            && self.currency == other.currency
            && self.status == other.status
            && self.invoice_pdf_url == other.invoice_pdf_url
            && self.hosted_invoice_url == other.hosted_invoice_url
            && self.paid_at == other.paid_at
            && self.due_date == other.due_date
    }
}

/// Result of an invoice upsert keyed by provider invoice id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Duplicate delivery, or an attempt to overwrite a paid invoice
    Unchanged,
}

/// Rows removed by a tenant purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub subscriptions: u64,
    pub invoices: u64,
    pub customers: u64,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Latest active/trialing subscription of the tenant
    async fn find_active(&self, tenant_id: &str) -> StoreResult<Option<Subscription>>;

    async fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>>;

    /// Latest active, trialing or past-due subscription of a provider customer
    async fn find_current_by_customer(
        &self,
        provider_customer_id: &str,
    ) -> StoreResult<Option<Subscription>>;

    /// Provider customer id of the tenant from any subscription row (canceled
    /// included) or the customer mapping
    async fn find_customer_id(&self, tenant_id: &str) -> StoreResult<Option<String>>;

    async fn save_customer_id(
        &self,
        tenant_id: &str,
        provider_customer_id: &str,
        now: i64,
    ) -> StoreResult<()>;

    /// Insert a new row; `Conflict` if the tenant already has a live one
    async fn insert(&self, sub: &Subscription) -> StoreResult<()>;

    /// Compare-and-swap on `sub.version`; stores `version + 1`.
    /// Returns `false` when the row changed since it was read.
    async fn update(&self, sub: &Subscription) -> StoreResult<bool>;

    /// In one transaction: cancel every active, trialing or past-due row of the
    /// tenant (`canceled_at = now`) and insert `new`. Returns the superseded rows.
    async fn supersede_and_insert(
        &self,
        new: &Subscription,
        now: i64,
    ) -> StoreResult<Vec<Subscription>>;

    /// Upsert keyed by provider invoice id. A paid invoice is never overwritten.
    async fn upsert_invoice(&self, invoice: &Invoice) -> StoreResult<UpsertOutcome>;

    /// Newest first
    async fn list_invoices(&self, tenant_id: &str, limit: i64) -> StoreResult<Vec<Invoice>>;

    /// Full history, newest first
    async fn list_subscriptions(&self, tenant_id: &str) -> StoreResult<Vec<Subscription>>;

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool>;

    async fn mark_event_processed(
        &self,
        event_id: &str,
        event_type: &str,
        now: i64,
    ) -> StoreResult<()>;

    /// Delete invoices, subscriptions and the customer mapping of a tenant in
    /// one transaction
    async fn purge_tenant(&self, tenant_id: &str) -> StoreResult<PurgeReport>;
}

/// Tenant directory, read-only: seat counting
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn employee_count(&self, tenant_id: &str) -> StoreResult<i64>;
}

pub(crate) fn parse_enum<T>(value: &str, what: &str, parse: fn(&str) -> Option<T>) -> StoreResult<T> {
    parse(value).ok_or_else(|| StoreError::Corrupt(format!("{what} '{value}'")))
}

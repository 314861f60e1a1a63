//! In-memory store for tests and local development
//!
//! Mirrors the PostgreSQL constraints: one live subscription per tenant,
//! unique provider invoice ids, versioned updates.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use shared::billing::{InvoiceStatus, SubscriptionStatus};
use tokio::sync::Mutex;

use super::{
    EmployeeDirectory, Invoice, PurgeReport, StoreError, StoreResult, Subscription,
    SubscriptionStore, UpsertOutcome,
};

#[derive(Default)]
struct Inner {
    subscriptions: Vec<Subscription>,
    invoices: Vec<Invoice>,
    customers: HashMap<String, String>,
    processed_events: HashSet<String>,
}

impl Inner {
    fn has_other_live(&self, tenant_id: &str, except_id: i64) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.tenant_id == tenant_id && s.id != except_id && s.status.is_live())
    }

    fn latest<'a>(
        &'a self,
        pred: impl Fn(&Subscription) -> bool,
    ) -> Option<&'a Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| pred(s))
            .max_by_key(|s| (s.created_at, s.id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_active(&self, tenant_id: &str) -> StoreResult<Option<Subscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .latest(|s| s.tenant_id == tenant_id && s.status.is_live())
            .cloned())
    }

    async fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .iter()
            .find(|s| s.provider_subscription_id.as_deref() == Some(provider_subscription_id))
            .cloned())
    }

    async fn find_current_by_customer(
        &self,
        provider_customer_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .latest(|s| {
                s.provider_customer_id.as_deref() == Some(provider_customer_id)
                    && !s.status.is_terminal()
            })
            .cloned())
    }

    async fn find_customer_id(&self, tenant_id: &str) -> StoreResult<Option<String>> {
        let inner = self.inner.lock().await;
        let from_rows = inner
            .latest(|s| s.tenant_id == tenant_id && s.provider_customer_id.is_some())
            .and_then(|s| s.provider_customer_id.clone());
        Ok(from_rows.or_else(|| inner.customers.get(tenant_id).cloned()))
    }

    async fn save_customer_id(
        &self,
        tenant_id: &str,
        provider_customer_id: &str,
        _now: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .customers
            .insert(tenant_id.to_string(), provider_customer_id.to_string());
        Ok(())
    }

    async fn insert(&self, sub: &Subscription) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if sub.status.is_live() && inner.has_other_live(&sub.tenant_id, sub.id) {
            return Err(StoreError::Conflict("tenant already has a live subscription"));
        }
        inner.subscriptions.push(sub.clone());
        Ok(())
    }

    async fn update(&self, sub: &Subscription) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if sub.status.is_live() && inner.has_other_live(&sub.tenant_id, sub.id) {
            return Err(StoreError::Conflict("tenant already has a live subscription"));
        }
        let Some(row) = inner.subscriptions.iter_mut().find(|s| s.id == sub.id) else {
            return Ok(false);
        };
        if row.version != sub.version {
            return Ok(false);
        }
        *row = Subscription {
            version: sub.version + 1,
            ..sub.clone()
        };
        Ok(true)
    }

    async fn supersede_and_insert(
        &self,
        new: &Subscription,
        now: i64,
    ) -> StoreResult<Vec<Subscription>> {
        let mut inner = self.inner.lock().await;
        let mut superseded = Vec::new();
        for row in inner
            .subscriptions
            .iter_mut()
            .filter(|s| s.tenant_id == new.tenant_id && !s.status.is_terminal())
        {
            row.status = SubscriptionStatus::Canceled;
            row.canceled_at = Some(now);
            row.updated_at = now;
            row.version += 1;
            superseded.push(row.clone());
        }
        inner.subscriptions.push(new.clone());
        Ok(superseded)
    }

    async fn upsert_invoice(&self, invoice: &Invoice) -> StoreResult<UpsertOutcome> {
        let mut inner = self.inner.lock().await;
        match inner
            .invoices
            .iter_mut()
            .find(|i| i.provider_invoice_id == invoice.provider_invoice_id)
        {
            None => {
                inner.invoices.push(invoice.clone());
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing)
                if existing.status == InvoiceStatus::Paid || existing.same_content(invoice) =>
            {
                Ok(UpsertOutcome::Unchanged)
            }
            Some(existing) => {
                *existing = Invoice {
                    id: existing.id,
                    tenant_id: existing.tenant_id.clone(),
                    created_at: existing.created_at,
                    ..invoice.clone()
                };
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn list_invoices(&self, tenant_id: &str, limit: i64) -> StoreResult<Vec<Invoice>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Invoice> = inner
            .invoices
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by_key(|i| std::cmp::Reverse((i.created_at, i.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_subscriptions(&self, tenant_id: &str) -> StoreResult<Vec<Subscription>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Subscription> = inner
            .subscriptions
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| std::cmp::Reverse((s.created_at, s.id)));
        Ok(rows)
    }

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().await.processed_events.contains(event_id))
    }

    async fn mark_event_processed(
        &self,
        event_id: &str,
        _event_type: &str,
        _now: i64,
    ) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .processed_events
            .insert(event_id.to_string());
        Ok(())
    }

    async fn purge_tenant(&self, tenant_id: &str) -> StoreResult<PurgeReport> {
        let mut inner = self.inner.lock().await;
        let before_inv = inner.invoices.len();
        inner.invoices.retain(|i| i.tenant_id != tenant_id);
        let before_sub = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.tenant_id != tenant_id);
        let customers = u64::from(inner.customers.remove(tenant_id).is_some());

        Ok(PurgeReport {
            subscriptions: (before_sub - inner.subscriptions.len()) as u64,
            invoices: (before_inv - inner.invoices.len()) as u64,
            customers,
        })
    }
}

/// Fixed employee counts per tenant
#[derive(Default)]
pub struct StaticDirectory {
    counts: DashMap<String, i64>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant_id: &str, count: i64) {
        self.counts.insert(tenant_id.to_string(), count);
    }
}

#[async_trait]
impl EmployeeDirectory for StaticDirectory {
    async fn employee_count(&self, tenant_id: &str) -> StoreResult<i64> {
        Ok(self.counts.get(tenant_id).map(|c| *c).unwrap_or(0))
    }
}

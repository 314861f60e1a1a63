//! Subscription engine: lifecycle transitions and entitlement queries
//!
//! Every mutation runs under the tenant's lock and saves with a version check.
//! Remote calls always come first and are bounded by the provider timeout; a
//! failed or timed-out remote call leaves the local row untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use shared::billing::{BillingCycle, Currency, InvoiceStatus, Plan, SubscriptionStatus};
use shared::error::AppError;
use shared::util::{now_millis, secs_to_millis, snowflake_id};

use super::locks::TenantLocks;
use crate::catalog::{PlanCatalog, PlanLimits};
use crate::config::Config;
use crate::db::{
    EmployeeDirectory, Invoice, PurgeReport, StoreError, Subscription, SubscriptionStore,
    UpsertOutcome,
};
use crate::error::ServiceResult;
use crate::stripe::{CheckoutRequest, CheckoutSession, InvoiceObject, ProviderError, ProviderGateway};

const MAX_INVOICE_PAGE: i64 = 100;

/// Engine tuning and redirect targets
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound for every remote call
    pub remote_timeout: Duration,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub portal_return_url: String,
    /// Invoice listing size when the caller gives none
    pub invoice_page_size: i64,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote_timeout: config.stripe.timeout,
            checkout_success_url: config.checkout_success_url(),
            checkout_cancel_url: config.checkout_cancel_url(),
            portal_return_url: config.portal_return_url(),
            invoice_page_size: config.invoice_page_size,
        }
    }
}

/// Seat usage against the plan limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatUsage {
    pub current: i64,
    pub limit: i64,
    pub can_add: bool,
    pub plan: Plan,
}

/// Current subscription with seat usage and plan limits
#[derive(Debug, Clone, Serialize)]
pub struct CurrentSubscription {
    pub subscription: Option<Subscription>,
    pub active: bool,
    pub limits: PlanLimits,
    pub seats: SeatUsage,
}

/// Confirmed checkout, ready to become the tenant's subscription
#[derive(Debug, Clone)]
pub struct PaidSubscription {
    pub tenant_id: String,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    pub provider_customer_id: String,
    pub provider_subscription_id: String,
    pub provider_price_id: String,
    pub currency: Currency,
    pub amount: Decimal,
    /// Mirrors the provider (trialing while the trial runs)
    pub status: SubscriptionStatus,
    pub trial_end: Option<i64>,
    pub current_period_end: Option<i64>,
}

/// Next charge as the provider currently projects it; timestamps in millis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingInvoice {
    pub amount_due: Decimal,
    pub currency: Currency,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub next_payment_attempt: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvoiceSyncReport {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Provider timestamps have second resolution
pub(crate) fn provider_watermark(now_ms: i64) -> i64 {
    now_ms - now_ms.rem_euclid(1000)
}

/// Local invoice status for a provider invoice status
pub(crate) fn invoice_status(provider_status: Option<&str>) -> InvoiceStatus {
    match provider_status {
        Some("paid") => InvoiceStatus::Paid,
        Some("draft") => InvoiceStatus::Draft,
        Some("uncollectible") | Some("void") => InvoiceStatus::Failed,
        _ => InvoiceStatus::Pending,
    }
}

/// Build the local invoice row. `None` when the currency is not supported.
pub(crate) fn invoice_record(
    tenant_id: &str,
    subscription_id: Option<i64>,
    obj: &InvoiceObject,
    status: InvoiceStatus,
    now: i64,
) -> Option<Invoice> {
    let currency = Currency::from_code(&obj.currency)?;
    let minor = match status {
        InvoiceStatus::Paid => obj.amount_paid,
        _ => obj.amount_due,
    };
    let paid_at = match status {
        InvoiceStatus::Paid => Some(
            obj.status_transitions
                .paid_at
                .map(secs_to_millis)
                .unwrap_or(now),
        ),
        _ => None,
    };
    Some(Invoice {
        id: snowflake_id(),
        tenant_id: tenant_id.to_string(),
        subscription_id,
        provider_invoice_id: obj.id.clone(),
        amount: currency.from_minor_units(minor),
        currency,
        status,
        invoice_pdf_url: obj.invoice_pdf.clone(),
        hosted_invoice_url: obj.hosted_invoice_url.clone(),
        paid_at,
        due_date: obj.due_date.map(secs_to_millis),
        created_at: obj.created.map(secs_to_millis).unwrap_or(now),
        updated_at: now,
    })
}

/// The subscription state machine
#[derive(Clone)]
pub struct SubscriptionEngine {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn ProviderGateway>,
    employees: Arc<dyn EmployeeDirectory>,
    catalog: Arc<PlanCatalog>,
    locks: TenantLocks,
    settings: Arc<EngineSettings>,
}

impl SubscriptionEngine {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        gateway: Arc<dyn ProviderGateway>,
        employees: Arc<dyn EmployeeDirectory>,
        catalog: PlanCatalog,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            employees,
            catalog: Arc::new(catalog),
            locks: TenantLocks::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn locks(&self) -> &TenantLocks {
        &self.locks
    }

    pub(crate) fn store(&self) -> &dyn SubscriptionStore {
        self.store.as_ref()
    }

    pub(crate) fn gateway(&self) -> &dyn ProviderGateway {
        self.gateway.as_ref()
    }

    /// Run a provider call under the configured timeout
    pub(crate) async fn remote<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.settings.remote_timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout)?
    }

    /// Versioned save; returns the row as stored
    pub(crate) async fn save(&self, sub: Subscription) -> ServiceResult<Subscription> {
        if self.store.update(&sub).await? {
            Ok(Subscription {
                version: sub.version + 1,
                ..sub
            })
        } else {
            tracing::warn!(
                tenant_id = %sub.tenant_id,
                subscription_id = sub.id,
                "Subscription changed concurrently, update rejected"
            );
            Err(AppError::conflict("Subscription was modified concurrently, please retry").into())
        }
    }

    // ==================== Queries ====================

    /// The tenant's active or trialing subscription
    pub async fn get_active(&self, tenant_id: &str) -> ServiceResult<Option<Subscription>> {
        Ok(self.store.find_active(tenant_id).await?)
    }

    async fn active_plan(&self, tenant_id: &str) -> ServiceResult<Plan> {
        Ok(self
            .store
            .find_active(tenant_id)
            .await?
            .map(|s| s.plan)
            .unwrap_or(Plan::Free))
    }

    /// Employee count against the plan's seat limit (free limit without a subscription)
    pub async fn check_seat_limit(&self, tenant_id: &str) -> ServiceResult<SeatUsage> {
        let plan = self.active_plan(tenant_id).await?;
        let limit = self.catalog.limits_for(plan).employees;
        let current = self.employees.employee_count(tenant_id).await?;
        Ok(SeatUsage {
            current,
            limit,
            can_add: current < limit,
            plan,
        })
    }

    /// Fail with `SeatLimitReached` when no further seat may be added
    pub async fn enforce_seat_limit(&self, tenant_id: &str) -> ServiceResult<SeatUsage> {
        let usage = self.check_seat_limit(tenant_id).await?;
        if !usage.can_add {
            return Err(AppError::seat_limit_reached(usage.current, usage.limit, usage.plan).into());
        }
        Ok(usage)
    }

    /// Limits of the tenant's active plan
    pub async fn features(&self, tenant_id: &str) -> ServiceResult<PlanLimits> {
        let plan = self.active_plan(tenant_id).await?;
        Ok(*self.catalog.limits_for(plan))
    }

    pub async fn is_entitled(&self, tenant_id: &str) -> ServiceResult<bool> {
        Ok(self
            .store
            .find_active(tenant_id)
            .await?
            .is_some_and(|s| s.is_active() && s.ended_at.is_none()))
    }

    pub async fn current(&self, tenant_id: &str) -> ServiceResult<CurrentSubscription> {
        let subscription = self.store.find_active(tenant_id).await?;
        let plan = subscription.as_ref().map(|s| s.plan).unwrap_or(Plan::Free);
        let limit = self.catalog.limits_for(plan).employees;
        let current = self.employees.employee_count(tenant_id).await?;
        Ok(CurrentSubscription {
            active: subscription.as_ref().is_some_and(Subscription::is_active),
            limits: *self.catalog.limits_for(plan),
            seats: SeatUsage {
                current,
                limit,
                can_add: current < limit,
                plan,
            },
            subscription,
        })
    }

    /// Every subscription the tenant ever had, newest first
    pub async fn history(&self, tenant_id: &str) -> ServiceResult<Vec<Subscription>> {
        Ok(self.store.list_subscriptions(tenant_id).await?)
    }

    /// Newest first; `limit` clamped to 1..=100
    pub async fn list_invoices(
        &self,
        tenant_id: &str,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<Invoice>> {
        let limit = limit
            .unwrap_or(self.settings.invoice_page_size)
            .clamp(1, MAX_INVOICE_PAGE);
        Ok(self.store.list_invoices(tenant_id, limit).await?)
    }

    /// Preview of the tenant's next invoice. `None` without a billing account
    /// or when the provider has nothing scheduled.
    pub async fn upcoming_invoice(&self, tenant_id: &str) -> ServiceResult<Option<UpcomingInvoice>> {
        let Some(customer_id) = self.store.find_customer_id(tenant_id).await? else {
            return Ok(None);
        };
        let preview = self
            .remote(self.gateway.upcoming_invoice(&customer_id))
            .await
            .inspect_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to fetch upcoming invoice");
            })?;
        let Some(preview) = preview else {
            return Ok(None);
        };
        let Some(currency) = Currency::from_code(&preview.currency) else {
            tracing::warn!(tenant_id = %tenant_id, currency = %preview.currency, "Upcoming invoice in unsupported currency");
            return Ok(None);
        };
        Ok(Some(UpcomingInvoice {
            amount_due: currency.from_minor_units(preview.amount_due),
            currency,
            period_start: preview.period_start.map(secs_to_millis),
            period_end: preview.period_end.map(secs_to_millis),
            next_payment_attempt: preview.next_payment_attempt.map(secs_to_millis),
        }))
    }

    // ==================== Transitions ====================

    /// Create the free subscription if the tenant has no live one. Idempotent.
    ///
    /// A paid row in past due is still the tenant's subscription: it returns
    /// to active once the invoice settles, so no free row is opened beside it.
    pub async fn start_free_subscription(&self, tenant_id: &str) -> ServiceResult<Subscription> {
        let _guard = self.locks.lock(tenant_id).await;
        if let Some(existing) = self.store.find_active(tenant_id).await? {
            return Ok(existing);
        }
        if let Some(open) = self.open_paid_subscription(tenant_id).await? {
            tracing::info!(
                tenant_id = %tenant_id,
                status = open.status.as_db(),
                "Paid subscription still open, free plan not started"
            );
            return Ok(open);
        }

        let sub = Subscription::free(tenant_id, now_millis());
        match self.store.insert(&sub).await {
            Ok(()) => {
                tracing::info!(tenant_id = %tenant_id, "Free subscription started");
                Ok(sub)
            }
            // Another instance inserted first
            Err(StoreError::Conflict(_)) => self
                .store
                .find_active(tenant_id)
                .await?
                .ok_or_else(|| AppError::conflict("Subscription changed, please retry").into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_paid_subscription(&self, tenant_id: &str) -> ServiceResult<Option<Subscription>> {
        Ok(self
            .store
            .list_subscriptions(tenant_id)
            .await?
            .into_iter()
            .find(|s| s.is_paid() && !s.status.is_terminal()))
    }

    async fn ensure_customer(&self, tenant_id: &str) -> ServiceResult<String> {
        if let Some(id) = self.store.find_customer_id(tenant_id).await? {
            return Ok(id);
        }
        let id = self
            .remote(self.gateway.create_customer(tenant_id))
            .await
            .inspect_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to create provider customer");
            })?;
        self.store
            .save_customer_id(tenant_id, &id, now_millis())
            .await?;
        tracing::info!(tenant_id = %tenant_id, customer_id = %id, "Provider customer created");
        Ok(id)
    }

    /// Validate the purchase and open a provider checkout session
    pub async fn begin_checkout(
        &self,
        tenant_id: &str,
        plan: Plan,
        billing_cycle: BillingCycle,
        currency: Currency,
    ) -> ServiceResult<CheckoutSession> {
        if !plan.is_purchasable() {
            return Err(AppError::plan_not_purchasable(plan).into());
        }
        let price_id = match (
            self.catalog.price_for(plan, billing_cycle, currency),
            self.catalog.price_id_for(plan, billing_cycle, currency),
        ) {
            (Some(_), Some(id)) => id.to_string(),
            _ => return Err(AppError::price_not_configured(plan, billing_cycle, currency).into()),
        };

        let _guard = self.locks.lock(tenant_id).await;
        let customer_id = self.ensure_customer(tenant_id).await?;

        let request = CheckoutRequest {
            tenant_id,
            customer_id: &customer_id,
            price_id: &price_id,
            plan,
            billing_cycle,
            currency,
            trial_days: self.catalog.trial_days(),
            success_url: &self.settings.checkout_success_url,
            cancel_url: &self.settings.checkout_cancel_url,
        };
        let session = self
            .remote(self.gateway.create_checkout_session(&request))
            .await
            .inspect_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to create checkout session");
            })?;

        tracing::info!(
            tenant_id = %tenant_id,
            plan = plan.as_db(),
            billing_cycle = billing_cycle.as_db(),
            currency = currency.code(),
            session_id = %session.session_id,
            "Checkout session created"
        );
        Ok(session)
    }

    /// Make a confirmed checkout the tenant's subscription, superseding the
    /// previous one. Idempotent on the provider subscription id.
    pub async fn commit_paid_subscription(
        &self,
        paid: PaidSubscription,
    ) -> ServiceResult<Subscription> {
        let _guard = self.locks.lock(&paid.tenant_id).await;

        if let Some(existing) = self
            .store
            .find_by_provider_subscription(&paid.provider_subscription_id)
            .await?
        {
            tracing::info!(
                tenant_id = %paid.tenant_id,
                provider_subscription_id = %paid.provider_subscription_id,
                "Paid subscription already committed"
            );
            return Ok(existing);
        }

        let now = now_millis();
        let sub = Subscription {
            id: snowflake_id(),
            tenant_id: paid.tenant_id,
            plan: paid.plan,
            billing_cycle: paid.billing_cycle,
            status: paid.status,
            currency: paid.currency,
            amount: paid.amount,
            provider_customer_id: Some(paid.provider_customer_id),
            provider_subscription_id: Some(paid.provider_subscription_id),
            provider_price_id: Some(paid.provider_price_id),
            trial_end: paid.trial_end,
            current_period_start: Some(now),
            current_period_end: paid.current_period_end,
            cancel_at: None,
            canceled_at: None,
            ended_at: None,
            started_at: now,
            created_at: now,
            updated_at: now,
            last_event_at: None,
            version: 0,
        };
        let superseded = self.store.supersede_and_insert(&sub, now).await?;

        tracing::info!(
            tenant_id = %sub.tenant_id,
            plan = sub.plan.as_db(),
            status = sub.status.as_db(),
            superseded = superseded.len(),
            "Paid subscription committed"
        );
        Ok(sub)
    }

    /// Cancel at period end (grace period) or immediately (downgrade to free).
    ///
    /// Subscriptions without a provider reference always cancel immediately.
    pub async fn cancel(&self, tenant_id: &str, at_period_end: bool) -> ServiceResult<Subscription> {
        let _guard = self.locks.lock(tenant_id).await;
        let current = self
            .store
            .find_active(tenant_id)
            .await?
            .ok_or_else(AppError::no_active_subscription)?;

        let remote = match current.provider_subscription_id.as_deref() {
            Some(provider_id) => Some(
                self.remote(self.gateway.cancel_subscription(provider_id, at_period_end))
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            tenant_id = %tenant_id,
                            provider_subscription_id = provider_id,
                            error = %e,
                            "Remote cancellation failed, local subscription unchanged"
                        );
                    })?,
            ),
            None => None,
        };

        let now = now_millis();
        let mut next = current.clone();
        next.updated_at = now;
        if remote.is_some() {
            next.last_event_at = Some(provider_watermark(now));
        }

        match remote {
            Some(remote) if at_period_end => {
                next.cancel_at = current
                    .current_period_end
                    .or_else(|| remote.period().1.map(secs_to_millis))
                    .or_else(|| remote.pending_cancel_at().map(secs_to_millis));
            }
            _ => {
                next.status = SubscriptionStatus::Canceled;
                next.plan = Plan::Free;
                next.canceled_at = Some(now);
                next.ended_at = Some(now);
                next.cancel_at = None;
            }
        }

        let saved = self.save(next).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            at_period_end = at_period_end,
            status = saved.status.as_db(),
            cancel_at = ?saved.cancel_at,
            "Subscription canceled"
        );
        Ok(saved)
    }

    /// Undo a pending grace-period cancellation
    pub async fn reactivate(&self, tenant_id: &str) -> ServiceResult<Subscription> {
        let _guard = self.locks.lock(tenant_id).await;
        let current = self
            .store
            .find_active(tenant_id)
            .await?
            .ok_or_else(AppError::no_active_subscription)?;
        let provider_id = current
            .provider_subscription_id
            .clone()
            .ok_or_else(AppError::not_upgradable_in_place)?;
        if current.cancel_at.is_none() {
            return Err(AppError::not_pending_cancellation().into());
        }

        self.remote(self.gateway.resume_subscription(&provider_id))
            .await
            .inspect_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Remote reactivation failed");
            })?;

        let now = now_millis();
        let next = Subscription {
            cancel_at: None,
            updated_at: now,
            last_event_at: Some(provider_watermark(now)),
            ..current
        };
        let saved = self.save(next).await?;
        tracing::info!(tenant_id = %tenant_id, "Subscription reactivated");
        Ok(saved)
    }

    /// Change plan and/or cycle of a paid subscription in place.
    ///
    /// `price_id` overrides the catalog price id for the target plan.
    pub async fn upgrade(
        &self,
        tenant_id: &str,
        plan: Plan,
        billing_cycle: BillingCycle,
        price_id: Option<&str>,
    ) -> ServiceResult<Subscription> {
        if !plan.is_purchasable() {
            return Err(AppError::plan_not_purchasable(plan).into());
        }

        let _guard = self.locks.lock(tenant_id).await;
        let current = self
            .store
            .find_active(tenant_id)
            .await?
            .ok_or_else(AppError::no_active_subscription)?;
        let provider_id = current
            .provider_subscription_id
            .clone()
            .ok_or_else(AppError::not_upgradable_in_place)?;
        if current.plan == plan && current.billing_cycle == billing_cycle {
            return Err(AppError::validation(format!(
                "Subscription is already on {} ({})",
                plan.display_name(),
                billing_cycle.as_db()
            ))
            .into());
        }

        let currency = current.currency;
        let price_id = match price_id {
            Some(id) => id.to_string(),
            None => self
                .catalog
                .price_id_for(plan, billing_cycle, currency)
                .map(str::to_string)
                .ok_or_else(|| AppError::price_not_configured(plan, billing_cycle, currency))?,
        };
        let amount = self
            .catalog
            .price_for(plan, billing_cycle, currency)
            .ok_or_else(|| AppError::price_not_configured(plan, billing_cycle, currency))?;

        self.remote(self.gateway.change_subscription_price(&provider_id, &price_id))
            .await
            .inspect_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Remote plan change failed");
            })?;

        let now = now_millis();
        let from = current.plan;
        let next = Subscription {
            plan,
            billing_cycle,
            provider_price_id: Some(price_id),
            amount,
            updated_at: now,
            last_event_at: Some(provider_watermark(now)),
            ..current
        };
        let saved = self.save(next).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            from = from.as_db(),
            to = plan.as_db(),
            billing_cycle = billing_cycle.as_db(),
            "Subscription plan changed"
        );
        Ok(saved)
    }

    /// Provider-hosted management portal for the tenant's billing account
    pub async fn open_portal(&self, tenant_id: &str) -> ServiceResult<String> {
        let current = self
            .store
            .find_active(tenant_id)
            .await?
            .ok_or_else(AppError::no_active_subscription)?;
        let customer_id = current
            .provider_customer_id
            .ok_or_else(|| AppError::validation("No billing account, subscribe to a paid plan first"))?;

        let url = self
            .remote(
                self.gateway
                    .create_portal_session(&customer_id, &self.settings.portal_return_url),
            )
            .await
            .inspect_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to open billing portal");
            })?;
        Ok(url)
    }

    /// Pull the provider's invoice list and upsert it locally (recovers
    /// invoices whose webhooks were missed)
    pub async fn sync_invoices(&self, tenant_id: &str) -> ServiceResult<InvoiceSyncReport> {
        let Some(customer_id) = self.store.find_customer_id(tenant_id).await? else {
            return Ok(InvoiceSyncReport::default());
        };
        let remote = self
            .remote(self.gateway.list_invoices(&customer_id, MAX_INVOICE_PAGE))
            .await?;

        let now = now_millis();
        let mut report = InvoiceSyncReport {
            fetched: remote.len(),
            ..Default::default()
        };
        for obj in &remote {
            let subscription_id = match obj.subscription_id() {
                Some(provider_id) => self
                    .store
                    .find_by_provider_subscription(provider_id)
                    .await?
                    .map(|s| s.id),
                None => None,
            };
            let status = invoice_status(obj.status.as_deref());
            let Some(invoice) = invoice_record(tenant_id, subscription_id, obj, status, now) else {
                tracing::warn!(invoice_id = %obj.id, currency = %obj.currency, "Skipping invoice in unsupported currency");
                continue;
            };
            match self.store.upsert_invoice(&invoice).await? {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => {}
            }
        }

        tracing::info!(
            tenant_id = %tenant_id,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            "Invoices synced from provider"
        );
        Ok(report)
    }

    /// Delete all billing rows of a tenant
    pub async fn purge_tenant(&self, tenant_id: &str) -> ServiceResult<PurgeReport> {
        let _guard = self.locks.lock(tenant_id).await;
        let report = self.store.purge_tenant(tenant_id).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            subscriptions = report.subscriptions,
            invoices = report.invoices,
            "Tenant billing data purged"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::testing::harness;
    use crate::error::ServiceError;
    use crate::stripe::UpcomingInvoiceObject;
    use shared::error::ErrorCode;
    use crate::stripe::mock::remote_subscription;

    const T: &str = "tenant-1";

    fn paid(sub_id: &str, plan: Plan) -> PaidSubscription {
        PaidSubscription {
            tenant_id: T.into(),
            plan,
            billing_cycle: BillingCycle::Monthly,
            provider_customer_id: "cus_1".into(),
            provider_subscription_id: sub_id.into(),
            provider_price_id: format!("price_{}_usd_monthly", plan.as_db()),
            currency: Currency::Usd,
            amount: Decimal::new(29, 0),
            status: SubscriptionStatus::Active,
            trial_end: None,
            current_period_end: Some(2_000_000_000_000),
        }
    }

    /// Tenant on a paid professional plan, known to the mock provider
    async fn professional(h: &crate::billing::testing::Harness) -> Subscription {
        h.gateway.put_subscription(remote_subscription(
            "sub_1",
            "cus_1",
            "active",
            "price_professional_usd_monthly",
            (1_700_000_000, 2_000_000_000),
        ));
        h.engine
            .commit_paid_subscription(paid("sub_1", Plan::Professional))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_free_is_idempotent() {
        let h = harness();
        let first = h.engine.start_free_subscription(T).await.unwrap();
        let second = h.engine.start_free_subscription(T).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.plan, Plan::Free);
        assert_eq!(first.status, SubscriptionStatus::Active);
        assert!(first.provider_subscription_id.is_none());
        assert_eq!(h.store.list_subscriptions(T).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_seat_limit_defaults_to_free_plan() {
        let h = harness();
        h.employees.set(T, 1);
        let usage = h.engine.check_seat_limit(T).await.unwrap();
        assert_eq!(usage.limit, 2);
        assert!(usage.can_add);

        h.employees.set(T, 2);
        let usage = h.engine.check_seat_limit(T).await.unwrap();
        assert_eq!(usage.current, 2);
        assert!(!usage.can_add);

        let err = h.engine.enforce_seat_limit(T).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SeatLimitReached);
    }

    #[tokio::test]
    async fn test_seat_limit_follows_paid_plan() {
        let h = harness();
        h.employees.set(T, 2);
        professional(&h).await;

        let usage = h.engine.check_seat_limit(T).await.unwrap();
        assert_eq!(usage.limit, 50);
        assert!(usage.can_add);
        assert!(h.engine.features(T).await.unwrap().custom_logo);
    }

    #[tokio::test]
    async fn test_checkout_rejects_free_plan() {
        let h = harness();
        let err = h
            .engine
            .begin_checkout(T, Plan::Free, BillingCycle::Monthly, Currency::Usd)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PlanNotPurchasable);
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_requires_configured_price() {
        let h = harness();
        let err = h
            .engine
            .begin_checkout(T, Plan::Professional, BillingCycle::None, Currency::Usd)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PriceNotConfigured);
    }

    #[tokio::test]
    async fn test_checkout_reuses_customer() {
        let h = harness();
        let session = h
            .engine
            .begin_checkout(T, Plan::Professional, BillingCycle::Monthly, Currency::Usd)
            .await
            .unwrap();
        assert!(session.url.contains("price_professional_usd_monthly"));

        h.engine
            .begin_checkout(T, Plan::Enterprise, BillingCycle::Yearly, Currency::Kwd)
            .await
            .unwrap();

        let calls = h.gateway.calls();
        let customers = calls.iter().filter(|c| c.starts_with("create_customer")).count();
        assert_eq!(customers, 1);
        let expected = "create_checkout_session:cus_mock_1:price_enterprise_kwd_yearly:enterprise:3";
        assert!(calls.iter().any(|c| c == expected));
    }

    #[tokio::test]
    async fn test_checkout_reuses_customer_of_canceled_subscription() {
        let h = harness();
        professional(&h).await;
        h.engine.cancel(T, false).await.unwrap();

        h.engine
            .begin_checkout(T, Plan::Professional, BillingCycle::Monthly, Currency::Usd)
            .await
            .unwrap();
        let calls = h.gateway.calls();
        assert!(!calls.iter().any(|c| c.starts_with("create_customer")));
        assert!(calls.iter().any(|c| c.starts_with("create_checkout_session:cus_1:")));
    }

    #[tokio::test]
    async fn test_checkout_provider_failure_is_unavailable() {
        let h = harness();
        h.gateway.fail_calls(true);
        let err = h
            .engine
            .begin_checkout(T, Plan::Professional, BillingCycle::Monthly, Currency::Usd)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_commit_supersedes_free_subscription() {
        let h = harness();
        let free = h.engine.start_free_subscription(T).await.unwrap();
        let sub = professional(&h).await;

        assert_eq!(sub.plan, Plan::Professional);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.provider_subscription_id.as_deref(), Some("sub_1"));

        let history = h.store.list_subscriptions(T).await.unwrap();
        let old = history.iter().find(|s| s.id == free.id).unwrap();
        assert_eq!(old.status, SubscriptionStatus::Canceled);
        assert!(old.canceled_at.is_some());
        assert_eq!(history.iter().filter(|s| s.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn test_commit_is_idempotent_on_provider_id() {
        let h = harness();
        let first = professional(&h).await;
        let again = h
            .engine
            .commit_paid_subscription(paid("sub_1", Plan::Professional))
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(h.store.list_subscriptions(T).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_mirrors_trialing_status() {
        let h = harness();
        let mut trial = paid("sub_t", Plan::Enterprise);
        trial.status = SubscriptionStatus::Trialing;
        trial.trial_end = Some(1_800_000_000_000);
        let sub = h.engine.commit_paid_subscription(trial).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert!(h.engine.is_entitled(T).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_at_period_end_keeps_access() {
        let h = harness();
        let before = professional(&h).await;

        let sub = h.engine.cancel(T, true).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan, Plan::Professional);
        assert_eq!(sub.cancel_at, before.current_period_end);
        assert!(sub.canceled_at.is_none());
        assert_eq!(h.engine.check_seat_limit(T).await.unwrap().limit, 50);
        assert!(h.gateway.calls().contains(&"cancel_subscription:sub_1:true".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_immediately_downgrades() {
        let h = harness();
        professional(&h).await;

        let sub = h.engine.cancel(T, false).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert_eq!(sub.plan, Plan::Free);
        assert!(!sub.is_active());
        assert!(sub.canceled_at.is_some());
        assert!(h.engine.get_active(T).await.unwrap().is_none());
        assert_eq!(h.engine.check_seat_limit(T).await.unwrap().limit, 2);
    }

    #[tokio::test]
    async fn test_cancel_remote_failure_leaves_row_untouched() {
        let h = harness();
        let before = professional(&h).await;
        h.gateway.fail_calls(true);

        let err = h.engine.cancel(T, false).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProviderUnavailable);

        let after = h.engine.get_active(T).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_cancel_remote_timeout_leaves_row_untouched() {
        let h = harness();
        let before = professional(&h).await;
        h.gateway.delay_calls(Duration::from_secs(5));

        let err = h.engine.cancel(T, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::Provider(ProviderError::Timeout)));
        assert_eq!(h.engine.get_active(T).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_cancel_without_subscription() {
        let h = harness();
        let err = h.engine.cancel(T, true).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoActiveSubscription);
    }

    #[tokio::test]
    async fn test_cancel_free_plan_is_local_only() {
        let h = harness();
        h.engine.start_free_subscription(T).await.unwrap();
        let sub = h.engine.cancel(T, true).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reactivate_clears_pending_cancellation() {
        let h = harness();
        professional(&h).await;

        let err = h.engine.reactivate(T).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SubscriptionNotPendingCancellation);

        h.engine.cancel(T, true).await.unwrap();
        let sub = h.engine.reactivate(T).await.unwrap();
        assert!(sub.cancel_at.is_none());
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(h.gateway.calls().contains(&"resume_subscription:sub_1".to_string()));
    }

    #[tokio::test]
    async fn test_upgrade_mutates_in_place() {
        let h = harness();
        let before = professional(&h).await;

        let sub = h
            .engine
            .upgrade(T, Plan::Enterprise, BillingCycle::Yearly, None)
            .await
            .unwrap();
        assert_eq!(sub.id, before.id);
        assert_eq!(sub.plan, Plan::Enterprise);
        assert_eq!(sub.billing_cycle, BillingCycle::Yearly);
        assert_eq!(
            sub.provider_price_id.as_deref(),
            Some("price_enterprise_usd_yearly")
        );
        assert_eq!(sub.amount, Decimal::new(990, 0));
        assert_eq!(h.store.list_subscriptions(T).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_free_plan_is_rejected() {
        let h = harness();
        h.engine.start_free_subscription(T).await.unwrap();
        let err = h
            .engine
            .upgrade(T, Plan::Professional, BillingCycle::Monthly, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FreePlanCannotUpgradeInPlace);
    }

    #[tokio::test]
    async fn test_upgrade_remote_failure_leaves_row_untouched() {
        let h = harness();
        let before = professional(&h).await;
        h.gateway.fail_calls(true);
        let err = h
            .engine
            .upgrade(T, Plan::Enterprise, BillingCycle::Monthly, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProviderUnavailable);
        assert_eq!(h.engine.get_active(T).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_stale_copy_is_rejected_as_conflict() {
        let h = harness();
        let sub = professional(&h).await;
        h.engine.cancel(T, true).await.unwrap();

        let err = h.engine.save(sub).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConcurrentModification);
    }

    #[tokio::test]
    async fn test_open_portal() {
        let h = harness();
        h.engine.start_free_subscription(T).await.unwrap();
        let err = h.engine.open_portal(T).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);

        professional(&h).await;
        let url = h.engine.open_portal(T).await.unwrap();
        assert!(url.starts_with("https://portal.mock/cus_1"));
    }

    #[tokio::test]
    async fn test_invoice_page_is_clamped() {
        let h = harness();
        assert!(h.engine.list_invoices(T, Some(0)).await.unwrap().is_empty());
        assert!(h.engine.list_invoices(T, Some(10_000)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_invoices_is_idempotent() {
        let h = harness();
        professional(&h).await;
        let invoice: InvoiceObject = serde_json::from_value(serde_json::json!({
            "id": "in_1",
            "customer": "cus_1",
            "subscription": "sub_1",
            "status": "paid",
            "amount_paid": 2900,
            "currency": "usd",
            "created": 1_700_000_000,
            "status_transitions": { "paid_at": 1_700_000_100 }
        }))
        .unwrap();
        h.gateway.put_invoice(invoice);

        let first = h.engine.sync_invoices(T).await.unwrap();
        assert_eq!((first.fetched, first.inserted), (1, 1));
        let second = h.engine.sync_invoices(T).await.unwrap();
        assert_eq!((second.inserted, second.updated), (0, 0));

        let invoices = h.engine.list_invoices(T, None).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].amount, Decimal::new(29, 0));
        assert_eq!(invoices[0].paid_at, Some(1_700_000_100_000));
    }

    #[tokio::test]
    async fn test_upcoming_invoice_preview() {
        let h = harness();
        assert!(h.engine.upcoming_invoice(T).await.unwrap().is_none());
        assert!(h.gateway.calls().is_empty());

        professional(&h).await;
        assert!(h.engine.upcoming_invoice(T).await.unwrap().is_none());

        let preview: UpcomingInvoiceObject = serde_json::from_value(serde_json::json!({
            "amount_due": 2900,
            "currency": "usd",
            "period_start": 1_700_000_000,
            "period_end": 1_702_592_000,
            "next_payment_attempt": 1_702_595_600
        }))
        .unwrap();
        h.gateway.put_upcoming("cus_1", preview);

        let upcoming = h.engine.upcoming_invoice(T).await.unwrap().unwrap();
        assert_eq!(upcoming.amount_due, Decimal::new(29, 0));
        assert_eq!(upcoming.currency, Currency::Usd);
        assert_eq!(upcoming.next_payment_attempt, Some(1_702_595_600_000));
    }

    #[tokio::test]
    async fn test_upcoming_invoice_provider_failure_is_unavailable() {
        let h = harness();
        professional(&h).await;
        h.gateway.fail_calls(true);
        let err = h.engine.upcoming_invoice(T).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_purge_tenant() {
        let h = harness();
        h.engine.start_free_subscription(T).await.unwrap();
        professional(&h).await;
        let report = h.engine.purge_tenant(T).await.unwrap();
        assert_eq!(report.subscriptions, 2);
        assert!(h.engine.history(T).await.unwrap().is_empty());
    }

    #[test]
    fn test_provider_watermark_truncates_to_second() {
        assert_eq!(provider_watermark(1_700_000_000_999), 1_700_000_000_000);
        assert_eq!(provider_watermark(1_700_000_000_000), 1_700_000_000_000);
    }

    #[test]
    fn test_invoice_status_mapping() {
        assert_eq!(invoice_status(Some("paid")), InvoiceStatus::Paid);
        assert_eq!(invoice_status(Some("open")), InvoiceStatus::Pending);
        assert_eq!(invoice_status(Some("void")), InvoiceStatus::Failed);
        assert_eq!(invoice_status(None), InvoiceStatus::Pending);
    }
}

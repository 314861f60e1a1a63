//! Stripe webhook reconciliation
//!
//! Verified events are decoded into an [`EventKind`] and applied through the
//! engine. Delivery is at-least-once and unordered, so every handler is
//! idempotent on a provider identifier and subscription snapshots older than
//! the row's `last_event_at` are dropped. Processed event ids are recorded
//! after a successful application; a failed application is left unrecorded so
//! the provider's retry runs it again.

use rust_decimal::Decimal;
use shared::billing::{BillingCycle, Currency, InvoiceStatus, Plan, SubscriptionStatus};
use shared::util::{now_millis, secs_to_millis};

use super::engine::{PaidSubscription, SubscriptionEngine, invoice_record};
use crate::db::{Subscription, UpsertOutcome};
use crate::error::{ServiceError, ServiceResult};
use crate::stripe::{
    CheckoutSessionObject, EventKind, InvoiceObject, ProviderError, SignatureError,
    SubscriptionObject, WebhookEvent,
};

/// What happened to a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local state reflects the event
    Applied,
    /// Event id already processed
    Duplicate,
    /// Accepted without local effect (unknown kind, foreign or stale object)
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("undecodable webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("webhook processing failed: {0}")]
    Processing(#[from] ServiceError),
}

impl From<crate::db::StoreError> for WebhookError {
    fn from(e: crate::db::StoreError) -> Self {
        WebhookError::Processing(e.into())
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    engine: SubscriptionEngine,
}

impl WebhookReconciler {
    pub fn new(engine: SubscriptionEngine) -> Self {
        Self { engine }
    }

    /// Verify, decode and apply a raw delivery
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let signature = signature.ok_or(SignatureError::MissingHeader)?;
        self.engine.gateway().verify_webhook(payload, signature)?;
        let event = WebhookEvent::parse(payload)?;
        self.apply(&event).await
    }

    /// Apply an already authenticated event
    pub async fn apply(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, WebhookError> {
        let store = self.engine.store();
        if store.is_event_processed(&event.id).await? {
            tracing::info!(event_id = %event.id, event_type = %event.event_type, "Duplicate webhook event, skipping");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let outcome = match event.kind()? {
            EventKind::CheckoutCompleted(session) => self.checkout_completed(&session).await?,
            EventKind::InvoicePaid(invoice) => {
                self.invoice_settled(event, &invoice, InvoiceStatus::Paid)
                    .await?
            }
            EventKind::InvoicePaymentFailed(invoice) => {
                self.invoice_settled(event, &invoice, InvoiceStatus::Failed)
                    .await?
            }
            EventKind::SubscriptionUpdated(sub) => self.subscription_updated(event, &sub).await?,
            EventKind::SubscriptionDeleted(sub) => self.subscription_deleted(event, &sub).await?,
            EventKind::Unrecognized => {
                tracing::debug!(event_type = %event.event_type, "Unhandled webhook event type");
                ReconcileOutcome::Ignored
            }
        };

        store
            .mark_event_processed(&event.id, &event.event_type, now_millis())
            .await?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = ?outcome,
            "Webhook event reconciled"
        );
        Ok(outcome)
    }

    /// checkout.session.completed → commit the paid subscription
    async fn checkout_completed(
        &self,
        session: &CheckoutSessionObject,
    ) -> ServiceResult<ReconcileOutcome> {
        if session.mode.as_deref() != Some("subscription") {
            tracing::debug!(session_id = %session.id, "Checkout session is not a subscription, ignoring");
            return Ok(ReconcileOutcome::Ignored);
        }

        let meta = |key: &str| session.metadata.get(key).map(String::as_str);
        let (Some(tenant_id), Some(plan), Some(billing_cycle)) = (
            meta("tenant_id"),
            meta("plan").and_then(Plan::from_db),
            meta("billing_cycle").and_then(BillingCycle::from_db),
        ) else {
            tracing::warn!(session_id = %session.id, "Checkout session without billing metadata, ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };
        let (Some(customer_id), Some(provider_subscription_id)) =
            (session.customer.as_deref(), session.subscription.as_deref())
        else {
            tracing::warn!(session_id = %session.id, "Checkout session missing customer or subscription");
            return Ok(ReconcileOutcome::Ignored);
        };

        // The event only carries the session; price and period come from the subscription
        let remote = self
            .engine
            .remote(self.engine.gateway().get_subscription(provider_subscription_id))
            .await?;
        let provider_price_id = remote
            .price_id()
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!(
                    "subscription {provider_subscription_id} has no price item"
                ))
            })?
            .to_string();

        let currency = meta("currency")
            .or_else(|| remote.price().and_then(|p| p.currency.as_deref()))
            .or(session.currency.as_deref())
            .and_then(Currency::from_code);
        let Some(currency) = currency else {
            tracing::warn!(tenant_id = %tenant_id, session_id = %session.id, "Checkout in unsupported currency, ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };

        let status = SubscriptionStatus::from_provider(&remote.status)
            .unwrap_or(SubscriptionStatus::Active);
        if status.is_terminal() {
            tracing::warn!(
                tenant_id = %tenant_id,
                provider_subscription_id = provider_subscription_id,
                "Checked-out subscription already ended, not committing"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        let amount = remote
            .price()
            .and_then(|p| p.unit_amount)
            .map(|minor| currency.from_minor_units(minor))
            .or_else(|| {
                self.engine
                    .catalog()
                    .price_for(plan, billing_cycle, currency)
            })
            .unwrap_or(Decimal::ZERO);

        self.engine
            .commit_paid_subscription(PaidSubscription {
                tenant_id: tenant_id.to_string(),
                plan,
                billing_cycle,
                provider_customer_id: customer_id.to_string(),
                provider_subscription_id: provider_subscription_id.to_string(),
                provider_price_id,
                currency,
                amount,
                status,
                trial_end: remote.trial_end.map(secs_to_millis),
                current_period_end: remote.period().1.map(secs_to_millis),
            })
            .await?;
        Ok(ReconcileOutcome::Applied)
    }

    /// The subscription an invoice belongs to.
    ///
    /// The provider subscription id wins over the customer lookup, so an
    /// invoice for a canceled or superseded row is filed against that row
    /// rather than against whatever the customer holds now. Only invoices
    /// without a subscription id fall back to the customer's current (live or
    /// past due) row.
    async fn invoice_subscription(
        &self,
        invoice: &InvoiceObject,
    ) -> ServiceResult<Option<Subscription>> {
        let store = self.engine.store();
        if let Some(provider_id) = invoice.subscription_id()
            && let Some(sub) = store.find_by_provider_subscription(provider_id).await?
        {
            return Ok(Some(sub));
        }
        match invoice.customer.as_deref() {
            Some(customer_id) => Ok(store.find_current_by_customer(customer_id).await?),
            None => Ok(None),
        }
    }

    /// invoice.paid / invoice.payment_failed → upsert the invoice and move the
    /// subscription between active and past due
    async fn invoice_settled(
        &self,
        event: &WebhookEvent,
        invoice: &InvoiceObject,
        status: InvoiceStatus,
    ) -> ServiceResult<ReconcileOutcome> {
        let Some(found) = self.invoice_subscription(invoice).await? else {
            tracing::info!(invoice_id = %invoice.id, "Invoice for unknown subscription, ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };
        let _guard = self.engine.locks().lock(&found.tenant_id).await;
        let Some(sub) = self.invoice_subscription(invoice).await? else {
            return Ok(ReconcileOutcome::Ignored);
        };

        let now = now_millis();
        match invoice_record(&sub.tenant_id, Some(sub.id), invoice, status, now) {
            Some(record) => {
                let outcome = self.engine.store().upsert_invoice(&record).await?;
                if outcome == UpsertOutcome::Unchanged {
                    tracing::info!(invoice_id = %invoice.id, "Invoice already recorded");
                } else {
                    tracing::info!(
                        tenant_id = %sub.tenant_id,
                        invoice_id = %invoice.id,
                        status = status.as_db(),
                        amount = %record.amount,
                        "Invoice recorded"
                    );
                }
            }
            None => {
                tracing::warn!(invoice_id = %invoice.id, currency = %invoice.currency, "Invoice in unsupported currency, not recorded");
            }
        }

        let next_status = match (status, sub.status) {
            (InvoiceStatus::Paid, SubscriptionStatus::PastDue) => SubscriptionStatus::Active,
            (InvoiceStatus::Failed, s) if s.is_live() => SubscriptionStatus::PastDue,
            _ => return Ok(ReconcileOutcome::Applied),
        };
        let from = sub.status;
        let tenant_id = sub.tenant_id.clone();
        let created = event.created_millis();
        self.engine
            .save(Subscription {
                status: next_status,
                updated_at: now,
                last_event_at: Some(sub.last_event_at.map_or(created, |w| w.max(created))),
                ..sub
            })
            .await?;
        tracing::info!(
            tenant_id = %tenant_id,
            from = from.as_db(),
            to = next_status.as_db(),
            "Subscription status changed by invoice"
        );
        Ok(ReconcileOutcome::Applied)
    }

    /// customer.subscription.updated → overwrite from the provider snapshot
    async fn subscription_updated(
        &self,
        event: &WebhookEvent,
        remote: &SubscriptionObject,
    ) -> ServiceResult<ReconcileOutcome> {
        let store = self.engine.store();
        let Some(found) = store.find_by_provider_subscription(&remote.id).await? else {
            tracing::info!(provider_subscription_id = %remote.id, "Update for unknown subscription, ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };
        let _guard = self.engine.locks().lock(&found.tenant_id).await;
        let Some(sub) = store.find_by_provider_subscription(&remote.id).await? else {
            return Ok(ReconcileOutcome::Ignored);
        };

        if sub.status.is_terminal() {
            tracing::info!(tenant_id = %sub.tenant_id, provider_subscription_id = %remote.id, "Subscription already canceled, update ignored");
            return Ok(ReconcileOutcome::Ignored);
        }
        let created = event.created_millis();
        if sub.last_event_at.is_some_and(|w| created < w) {
            tracing::info!(
                tenant_id = %sub.tenant_id,
                event_id = %event.id,
                "Stale subscription update, ignored"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        let now = now_millis();
        let (period_start, period_end) = remote.period();
        let mut next = sub.clone();
        next.status = match SubscriptionStatus::from_provider(&remote.status) {
            Some(status) => status,
            None => {
                tracing::warn!(status = %remote.status, "Unknown provider status, keeping local status");
                sub.status
            }
        };
        next.current_period_start = period_start.map(secs_to_millis).or(sub.current_period_start);
        next.current_period_end = period_end.map(secs_to_millis).or(sub.current_period_end);
        next.cancel_at = remote.pending_cancel_at().map(secs_to_millis);
        next.trial_end = remote.trial_end.map(secs_to_millis).or(sub.trial_end);
        next.last_event_at = Some(created);
        next.updated_at = now;

        // Plan changes made in the provider's portal arrive as a new price
        if let Some(price_id) = remote.price_id()
            && sub.provider_price_id.as_deref() != Some(price_id)
        {
            match self.engine.catalog().resolve_price_id(price_id) {
                Some((plan, billing_cycle, currency)) => {
                    next.plan = plan;
                    next.billing_cycle = billing_cycle;
                    next.currency = currency;
                    next.provider_price_id = Some(price_id.to_string());
                    if let Some(amount) = self.engine.catalog().price_for(plan, billing_cycle, currency) {
                        next.amount = amount;
                    }
                }
                None => {
                    tracing::warn!(price_id = %price_id, "Unknown provider price, plan left unchanged");
                }
            }
        }

        if next.status.is_terminal() {
            next.plan = Plan::Free;
            next.cancel_at = None;
            next.canceled_at = Some(remote.canceled_at.map(secs_to_millis).unwrap_or(now));
            next.ended_at = Some(remote.ended_at.map(secs_to_millis).unwrap_or(now));
        }

        let saved = self.engine.save(next).await?;
        tracing::info!(
            tenant_id = %saved.tenant_id,
            status = saved.status.as_db(),
            plan = saved.plan.as_db(),
            cancel_at = ?saved.cancel_at,
            "Subscription updated from provider"
        );
        Ok(ReconcileOutcome::Applied)
    }

    /// customer.subscription.deleted → terminal cancel and downgrade
    async fn subscription_deleted(
        &self,
        event: &WebhookEvent,
        remote: &SubscriptionObject,
    ) -> ServiceResult<ReconcileOutcome> {
        let store = self.engine.store();
        let Some(found) = store.find_by_provider_subscription(&remote.id).await? else {
            tracing::info!(provider_subscription_id = %remote.id, "Deletion of unknown subscription, ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };
        let _guard = self.engine.locks().lock(&found.tenant_id).await;
        let Some(sub) = store.find_by_provider_subscription(&remote.id).await? else {
            return Ok(ReconcileOutcome::Ignored);
        };

        if sub.status.is_terminal() && sub.plan == Plan::Free && sub.ended_at.is_some() {
            return Ok(ReconcileOutcome::Ignored);
        }

        let now = now_millis();
        let created = event.created_millis();
        let tenant_id = sub.tenant_id.clone();
        self.engine
            .save(Subscription {
                status: SubscriptionStatus::Canceled,
                plan: Plan::Free,
                cancel_at: None,
                canceled_at: sub.canceled_at.or(Some(now)),
                ended_at: sub.ended_at.or(Some(now)),
                last_event_at: Some(sub.last_event_at.map_or(created, |w| w.max(created))),
                updated_at: now,
                ..sub
            })
            .await?;
        tracing::info!(tenant_id = %tenant_id, "Subscription ended by provider, downgraded to free");
        Ok(ReconcileOutcome::Applied)
    }
}

//! Scripted in-memory gateway for engine, reconciler and API tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::event::{InvoiceObject, SubscriptionObject, UpcomingInvoiceObject};
use super::signature::{self, SignatureError};
use super::{CheckoutRequest, CheckoutSession, ProviderError, ProviderGateway};

pub const WEBHOOK_SECRET: &str = "whsec_mock";

#[derive(Default)]
struct Inner {
    calls: Vec<String>,
    fail: bool,
    delay: Option<Duration>,
    next_customer: u32,
    subscriptions: HashMap<String, SubscriptionObject>,
    invoices: Vec<InvoiceObject>,
    upcoming: HashMap<String, UpcomingInvoiceObject>,
}

/// Records every call; `fail_next_calls` / `delay_calls` script failures
#[derive(Default)]
pub struct MockGateway {
    inner: Mutex<Inner>,
}

pub fn remote_subscription(
    id: &str,
    customer: &str,
    status: &str,
    price_id: &str,
    period: (i64, i64),
) -> SubscriptionObject {
    serde_json::from_value(json!({
        "id": id,
        "customer": customer,
        "status": status,
        "current_period_start": period.0,
        "current_period_end": period.1,
        "cancel_at_period_end": false,
        "items": { "data": [{
            "id": format!("si_{id}"),
            "price": { "id": price_id, "unit_amount": 2900, "currency": "usd" }
        }]}
    }))
    .unwrap()
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn fail_calls(&self, fail: bool) {
        self.inner.lock().unwrap().fail = fail;
    }

    pub fn delay_calls(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = Some(delay);
    }

    pub fn put_subscription(&self, sub: SubscriptionObject) {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .insert(sub.id.clone(), sub);
    }

    pub fn put_invoice(&self, invoice: InvoiceObject) {
        self.inner.lock().unwrap().invoices.push(invoice);
    }

    pub fn put_upcoming(&self, customer_id: &str, preview: UpcomingInvoiceObject) {
        self.inner
            .lock()
            .unwrap()
            .upcoming
            .insert(customer_id.to_string(), preview);
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        signature::sign_payload(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp())
    }

    async fn record(&self, call: String) -> Result<(), ProviderError> {
        let (fail, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(call);
            (inner.fail, inner.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ProviderError::Api {
                status: 500,
                message: "scripted failure".into(),
            });
        }
        Ok(())
    }

    fn subscription(&self, id: &str) -> Result<SubscriptionObject, ProviderError> {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("No such subscription: '{id}'"),
            })
    }

    fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut SubscriptionObject),
    ) -> Result<SubscriptionObject, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("No such subscription: '{id}'"),
            })?;
        f(sub);
        Ok(sub.clone())
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    async fn create_customer(&self, tenant_id: &str) -> Result<String, ProviderError> {
        self.record(format!("create_customer:{tenant_id}")).await?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_customer += 1;
        Ok(format!("cus_mock_{}", inner.next_customer))
    }

    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, ProviderError> {
        self.record(format!(
            "create_checkout_session:{}:{}:{}:{}",
            req.customer_id, req.price_id, req.plan.as_db(), req.trial_days
        ))
        .await?;
        Ok(CheckoutSession {
            session_id: "cs_mock".into(),
            url: format!("https://checkout.mock/{}", req.price_id),
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, ProviderError> {
        self.record(format!("create_portal_session:{customer_id}"))
            .await?;
        Ok(format!("https://portal.mock/{customer_id}?return={return_url}"))
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, ProviderError> {
        self.record(format!("get_subscription:{subscription_id}"))
            .await?;
        self.subscription(subscription_id)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<SubscriptionObject, ProviderError> {
        self.record(format!("cancel_subscription:{subscription_id}:{at_period_end}"))
            .await?;
        self.update(subscription_id, |sub| {
            if at_period_end {
                sub.cancel_at_period_end = true;
                sub.cancel_at = sub.period().1;
            } else {
                sub.status = "canceled".into();
            }
        })
    }

    async fn resume_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, ProviderError> {
        self.record(format!("resume_subscription:{subscription_id}"))
            .await?;
        self.update(subscription_id, |sub| {
            sub.cancel_at_period_end = false;
            sub.cancel_at = None;
        })
    }

    async fn change_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<SubscriptionObject, ProviderError> {
        self.record(format!("change_subscription_price:{subscription_id}:{price_id}"))
            .await?;
        self.update(subscription_id, |sub| {
            if let Some(item) = sub.items.data.first_mut() {
                item.price.id = price_id.to_string();
            }
        })
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<InvoiceObject>, ProviderError> {
        self.record(format!("list_invoices:{customer_id}")).await?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .invoices
            .iter()
            .filter(|inv| inv.customer.as_deref() == Some(customer_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn upcoming_invoice(
        &self,
        customer_id: &str,
    ) -> Result<Option<UpcomingInvoiceObject>, ProviderError> {
        self.record(format!("upcoming_invoice:{customer_id}")).await?;
        Ok(self.inner.lock().unwrap().upcoming.get(customer_id).cloned())
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), SignatureError> {
        signature::verify_signature(
            payload,
            signature_header,
            WEBHOOK_SECRET,
            300,
            chrono::Utc::now().timestamp(),
        )
    }
}

//! Typed decode of Stripe webhook events and the API objects they carry
//!
//! The envelope is decoded once; `data.object` stays raw until [`WebhookEvent::kind`]
//! picks the object type from the event type. Unknown event types decode to
//! [`EventKind::Unrecognized`] instead of failing.

use std::collections::HashMap;

use serde::Deserialize;

/// Webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Event kinds the reconciler acts on
#[derive(Debug, Clone)]
pub enum EventKind {
    CheckoutCompleted(CheckoutSessionObject),
    InvoicePaid(InvoiceObject),
    InvoicePaymentFailed(InvoiceObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    Unrecognized,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Event creation time in Unix milliseconds
    pub fn created_millis(&self) -> i64 {
        shared::util::secs_to_millis(self.created)
    }

    /// Decode `data.object` according to the event type
    pub fn kind(&self) -> Result<EventKind, serde_json::Error> {
        let object = || self.data.object.clone();
        Ok(match self.event_type.as_str() {
            "checkout.session.completed" => {
                EventKind::CheckoutCompleted(serde_json::from_value(object())?)
            }
            "invoice.paid" | "invoice.payment_succeeded" => {
                EventKind::InvoicePaid(serde_json::from_value(object())?)
            }
            "invoice.payment_failed" => {
                EventKind::InvoicePaymentFailed(serde_json::from_value(object())?)
            }
            "customer.subscription.updated" => {
                EventKind::SubscriptionUpdated(serde_json::from_value(object())?)
            }
            "customer.subscription.deleted" => {
                EventKind::SubscriptionDeleted(serde_json::from_value(object())?)
            }
            _ => EventKind::Unrecognized,
        })
    }
}

/// `checkout.session` object
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// `subscription` object (webhook payload and API response share the shape)
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub items: ItemList,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub price: Price,
    // Newer API versions report the period per item
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl SubscriptionObject {
    fn first_item(&self) -> Option<&SubscriptionItem> {
        self.items.data.first()
    }

    pub fn item_id(&self) -> Option<&str> {
        self.first_item().map(|i| i.id.as_str())
    }

    pub fn price(&self) -> Option<&Price> {
        self.first_item().map(|i| &i.price)
    }

    pub fn price_id(&self) -> Option<&str> {
        self.price().map(|p| p.id.as_str())
    }

    /// `(start, end)` of the current period in Unix seconds
    pub fn period(&self) -> (Option<i64>, Option<i64>) {
        let item = self.first_item();
        (
            self.current_period_start
                .or_else(|| item.and_then(|i| i.current_period_start)),
            self.current_period_end
                .or_else(|| item.and_then(|i| i.current_period_end)),
        )
    }

    /// Effective pending-cancellation time in Unix seconds
    pub fn pending_cancel_at(&self) -> Option<i64> {
        match self.cancel_at {
            Some(at) => Some(at),
            None if self.cancel_at_period_end => self.period().1,
            None => None,
        }
    }
}

/// `invoice` object
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_due: i64,
    pub currency: String,
    #[serde(default)]
    pub invoice_pdf: Option<String>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub due_date: Option<i64>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub status_transitions: StatusTransitions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<SubscriptionDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionDetails {
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusTransitions {
    #[serde(default)]
    pub paid_at: Option<i64>,
}

impl InvoiceObject {
    /// Subscription id, wherever this API version puts it
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_deref().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|p| p.subscription_details.as_ref())
                .and_then(|d| d.subscription.as_deref())
        })
    }
}

/// Preview of the next invoice; it has no id until the provider drafts it
#[derive(Debug, Clone, Deserialize)]
pub struct UpcomingInvoiceObject {
    #[serde(default)]
    pub amount_due: i64,
    pub currency: String,
    #[serde(default)]
    pub period_start: Option<i64>,
    #[serde(default)]
    pub period_end: Option<i64>,
    #[serde(default)]
    pub next_payment_attempt: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, object: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1_700_000_000,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn test_checkout_completed_decodes_metadata() {
        let ev = event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "tenant_id": "t1", "plan": "professional", "billing_cycle": "monthly" }
            }),
        );
        assert_eq!(ev.created_millis(), 1_700_000_000_000);
        match ev.kind().unwrap() {
            EventKind::CheckoutCompleted(session) => {
                assert_eq!(session.subscription.as_deref(), Some("sub_1"));
                assert_eq!(session.metadata["plan"], "professional");
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_unrecognized() {
        let ev = event("customer.tax_id.created", json!({ "whatever": true }));
        assert!(matches!(ev.kind().unwrap(), EventKind::Unrecognized));
    }

    #[test]
    fn test_known_event_with_bad_object_fails() {
        let ev = event("invoice.paid", json!({ "id": 42 }));
        assert!(ev.kind().is_err());
    }

    #[test]
    fn test_subscription_period_falls_back_to_items() {
        let ev = event(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "cancel_at_period_end": true,
                "items": { "data": [{
                    "id": "si_1",
                    "price": { "id": "price_professional_usd_monthly", "unit_amount": 2900, "currency": "usd" },
                    "current_period_start": 100,
                    "current_period_end": 200
                }]}
            }),
        );
        let EventKind::SubscriptionUpdated(sub) = ev.kind().unwrap() else {
            panic!("expected subscription update");
        };
        assert_eq!(sub.period(), (Some(100), Some(200)));
        assert_eq!(sub.pending_cancel_at(), Some(200));
        assert_eq!(sub.price_id(), Some("price_professional_usd_monthly"));
        assert_eq!(sub.item_id(), Some("si_1"));
    }

    #[test]
    fn test_invoice_subscription_from_parent() {
        let ev = event(
            "invoice.payment_failed",
            json!({
                "id": "in_1",
                "currency": "usd",
                "amount_due": 2900,
                "parent": { "subscription_details": { "subscription": "sub_9" } }
            }),
        );
        let EventKind::InvoicePaymentFailed(inv) = ev.kind().unwrap() else {
            panic!("expected payment failure");
        };
        assert_eq!(inv.subscription_id(), Some("sub_9"));
        assert_eq!(inv.amount_paid, 0);
    }

    #[test]
    fn test_upcoming_invoice_without_id() {
        let preview: UpcomingInvoiceObject = serde_json::from_value(json!({
            "object": "invoice",
            "amount_due": 8900,
            "currency": "kwd",
            "next_payment_attempt": 1_700_100_000
        }))
        .unwrap();
        assert_eq!(preview.amount_due, 8900);
        assert_eq!(preview.next_payment_attempt, Some(1_700_100_000));
        assert!(preview.period_end.is_none());
    }
}

//! Stripe REST client
//!
//! Form-encoded requests over `reqwest`, secret key as basic-auth user. Every
//! request is bounded by the configured provider timeout.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::event::{InvoiceObject, SubscriptionObject, UpcomingInvoiceObject};
use super::signature::{self, SignatureError};
use super::{CheckoutRequest, CheckoutSession, ProviderError, ProviderGateway};
use crate::config::StripeConfig;

type Form<'a> = Vec<(&'a str, String)>;

/// [`ProviderGateway`] backed by the Stripe API
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
    webhook_tolerance_secs: i64,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

fn transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(e)
    }
}

impl StripeGateway {
    pub fn new(config: &StripeConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Http)?;
        Ok(Self {
            http,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.api_base)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &Form<'_>) -> Result<T, ProviderError> {
        let resp = self
            .http
            .post(self.url(path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &Form<'_>) -> Result<T, ProviderError> {
        let resp = self
            .http
            .get(self.url(path))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(resp).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let resp = self
            .http
            .delete(self.url(path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(transport)?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider error")
                .to_string();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_value(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl ProviderGateway for StripeGateway {
    async fn create_customer(&self, tenant_id: &str) -> Result<String, ProviderError> {
        let form = vec![("metadata[tenant_id]", tenant_id.to_string())];
        let resp: IdResponse = self.post("customers", &form).await?;
        Ok(resp.id)
    }

    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, ProviderError> {
        let mut form: Form = vec![
            ("customer", req.customer_id.to_string()),
            ("mode", "subscription".into()),
            ("line_items[0][price]", req.price_id.to_string()),
            ("line_items[0][quantity]", "1".into()),
            (
                "success_url",
                format!("{}?session_id={{CHECKOUT_SESSION_ID}}", req.success_url),
            ),
            ("cancel_url", req.cancel_url.to_string()),
            ("metadata[tenant_id]", req.tenant_id.to_string()),
            ("metadata[plan]", req.plan.as_db().into()),
            ("metadata[billing_cycle]", req.billing_cycle.as_db().into()),
            ("metadata[currency]", req.currency.code().into()),
            ("subscription_data[metadata][tenant_id]", req.tenant_id.to_string()),
            ("subscription_data[metadata][plan]", req.plan.as_db().into()),
            (
                "subscription_data[metadata][billing_cycle]",
                req.billing_cycle.as_db().into(),
            ),
        ];
        if req.trial_days > 0 {
            form.push((
                "subscription_data[trial_period_days]",
                req.trial_days.to_string(),
            ));
        }

        let resp: SessionResponse = self.post("checkout/sessions", &form).await?;
        let url = resp.url.ok_or_else(|| {
            ProviderError::MalformedResponse(format!("checkout session {} has no url", resp.id))
        })?;
        Ok(CheckoutSession {
            session_id: resp.id,
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, ProviderError> {
        let form = vec![
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        let resp: UrlResponse = self.post("billing_portal/sessions", &form).await?;
        Ok(resp.url)
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, ProviderError> {
        self.get(&format!("subscriptions/{subscription_id}"), &vec![])
            .await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<SubscriptionObject, ProviderError> {
        let path = format!("subscriptions/{subscription_id}");
        if at_period_end {
            let form = vec![("cancel_at_period_end", "true".to_string())];
            self.post(&path, &form).await
        } else {
            self.delete(&path).await
        }
    }

    async fn resume_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, ProviderError> {
        let form = vec![("cancel_at_period_end", "false".to_string())];
        self.post(&format!("subscriptions/{subscription_id}"), &form)
            .await
    }

    async fn change_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<SubscriptionObject, ProviderError> {
        let current = self.get_subscription(subscription_id).await?;
        let item_id = current.item_id().ok_or_else(|| {
            ProviderError::MalformedResponse(format!(
                "subscription {subscription_id} has no items"
            ))
        })?;

        let form = vec![
            ("items[0][id]", item_id.to_string()),
            ("items[0][price]", price_id.to_string()),
            ("proration_behavior", "always_invoice".to_string()),
        ];
        self.post(&format!("subscriptions/{subscription_id}"), &form)
            .await
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<InvoiceObject>, ProviderError> {
        let query = vec![
            ("customer", customer_id.to_string()),
            ("limit", limit.clamp(1, 100).to_string()),
        ];
        let resp: ListResponse<InvoiceObject> = self.get("invoices", &query).await?;
        Ok(resp.data)
    }

    async fn upcoming_invoice(
        &self,
        customer_id: &str,
    ) -> Result<Option<UpcomingInvoiceObject>, ProviderError> {
        let query = vec![("customer", customer_id.to_string())];
        match self.get("invoices/upcoming", &query).await {
            Ok(preview) => Ok(Some(preview)),
            // No active subscription, nothing scheduled
            Err(ProviderError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), SignatureError> {
        signature::verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            self.webhook_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            api_base: "http://localhost:12111/".into(),
            timeout: Duration::from_secs(2),
            webhook_tolerance_secs: 300,
        }
    }

    #[test]
    fn test_url_joins_base_without_double_slash() {
        let gateway = StripeGateway::new(&config()).unwrap();
        assert_eq!(
            gateway.url("checkout/sessions"),
            "http://localhost:12111/v1/checkout/sessions"
        );
    }

    #[test]
    fn test_verify_webhook_uses_configured_secret() {
        let gateway = StripeGateway::new(&config()).unwrap();
        let payload = br#"{"id":"evt_1"}"#;
        let now = chrono::Utc::now().timestamp();
        let header = signature::sign_payload(payload, "whsec_test", now);
        assert!(gateway.verify_webhook(payload, &header).is_ok());

        let forged = signature::sign_payload(payload, "whsec_other", now);
        assert_eq!(
            gateway.verify_webhook(payload, &forged),
            Err(SignatureError::Mismatch)
        );
    }
}

//! Stripe webhook handler
//!
//! POST /webhooks/stripe: raw body, verified against the Stripe-Signature header.
//! 400 tells Stripe not to bother retrying; 500 asks for a redelivery.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use shared::error::AppError;

use crate::billing::WebhookError;
use crate::state::AppState;

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    match state.webhooks.handle(&body, signature).await {
        Ok(_) => Ok(StatusCode::OK),
        Err(WebhookError::Signature(e)) => {
            tracing::warn!(error = %e, "Webhook signature verification failed");
            Err(AppError::webhook_signature_invalid())
        }
        Err(WebhookError::Payload(e)) => {
            tracing::warn!(error = %e, "Failed to decode webhook payload");
            Err(AppError::webhook_payload_invalid())
        }
        Err(WebhookError::Processing(e)) => {
            tracing::error!(error = %e, "Webhook processing failed, awaiting redelivery");
            Err(AppError::internal())
        }
    }
}

//! API routes for subscription-cloud

pub mod billing;
pub mod health;
pub mod stripe_webhook;

use axum::routing::{get, post};
use axum::{Router, middleware};
use tower_http::trace::TraceLayer;

use crate::auth::tenant_identity_middleware;
use crate::state::AppState;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    // Tenant billing API (identity forwarded by the auth gateway)
    let tenant = Router::new()
        .route("/api/billing/plans", get(billing::list_plans))
        .route(
            "/api/billing/subscription",
            get(billing::current_subscription).post(billing::start_free),
        )
        .route(
            "/api/billing/subscription/history",
            get(billing::subscription_history),
        )
        .route("/api/billing/invoices", get(billing::list_invoices))
        .route("/api/billing/invoices/sync", post(billing::sync_invoices))
        .route(
            "/api/billing/invoices/upcoming",
            get(billing::upcoming_invoice),
        )
        .route("/api/billing/checkout", post(billing::create_checkout))
        .route("/api/billing/portal", post(billing::billing_portal))
        .route("/api/billing/cancel", post(billing::cancel))
        .route("/api/billing/upgrade", post(billing::upgrade))
        .route("/api/billing/reactivate", post(billing::reactivate))
        .layer(middleware::from_fn(tenant_identity_middleware));

    // Stripe webhook (signature-verified, raw body)
    let webhook = Router::new().route("/webhooks/stripe", post(stripe_webhook::handle_webhook));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(tenant)
        .merge(webhook)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

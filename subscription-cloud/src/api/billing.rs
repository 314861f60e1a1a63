//! Tenant billing endpoints: plans, subscription, checkout, portal, invoices

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use shared::billing::{BillingCycle, Currency, Plan};
use shared::error::{ApiResponse, AppError};

use crate::auth::TenantIdentity;
use crate::billing::{CurrentSubscription, InvoiceSyncReport, UpcomingInvoice};
use crate::catalog::PlanOffer;
use crate::db::{Invoice, Subscription};
use crate::state::AppState;
use crate::stripe::CheckoutSession;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

fn parse_plan(raw: &str) -> Result<Plan, AppError> {
    Plan::from_db(raw).ok_or_else(|| AppError::validation(format!("Unknown plan '{raw}'")))
}

fn parse_cycle(raw: &str) -> Result<BillingCycle, AppError> {
    BillingCycle::from_db(raw)
        .ok_or_else(|| AppError::validation(format!("Unknown billing cycle '{raw}'")))
}

fn parse_currency(raw: &str) -> Result<Currency, AppError> {
    Currency::from_code(raw)
        .ok_or_else(|| AppError::validation(format!("Unsupported currency '{raw}'")))
}

/// GET /api/billing/plans
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Vec<PlanOffer>> {
    ok(state.engine.catalog().offers())
}

/// POST /api/billing/subscription: start the free plan (idempotent)
pub async fn start_free(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<Subscription> {
    ok(state
        .engine
        .start_free_subscription(&identity.tenant_id)
        .await?)
}

/// GET /api/billing/subscription
pub async fn current_subscription(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<CurrentSubscription> {
    ok(state.engine.current(&identity.tenant_id).await?)
}

/// GET /api/billing/subscription/history
pub async fn subscription_history(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<Vec<Subscription>> {
    ok(state.engine.history(&identity.tenant_id).await?)
}

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub limit: Option<i64>,
}

/// GET /api/billing/invoices?limit=N
pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Vec<Invoice>> {
    ok(state
        .engine
        .list_invoices(&identity.tenant_id, query.limit)
        .await?)
}

/// GET /api/billing/invoices/upcoming: `data` is null when nothing is scheduled
pub async fn upcoming_invoice(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<Option<UpcomingInvoice>> {
    ok(state.engine.upcoming_invoice(&identity.tenant_id).await?)
}

/// POST /api/billing/invoices/sync
pub async fn sync_invoices(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<InvoiceSyncReport> {
    identity.require_billing_admin()?;
    ok(state.engine.sync_invoices(&identity.tenant_id).await?)
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
    pub billing_cycle: String,
    pub currency: String,
}

/// POST /api/billing/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<CheckoutSession> {
    identity.require_billing_admin()?;
    let plan = parse_plan(&req.plan)?;
    let cycle = parse_cycle(&req.billing_cycle)?;
    let currency = parse_currency(&req.currency)?;

    ok(state
        .engine
        .begin_checkout(&identity.tenant_id, plan, cycle, currency)
        .await?)
}

#[derive(Debug, Serialize)]
pub struct PortalSession {
    pub url: String,
}

/// POST /api/billing/portal
pub async fn billing_portal(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<PortalSession> {
    identity.require_billing_admin()?;
    let url = state.engine.open_portal(&identity.tenant_id).await?;
    ok(PortalSession { url })
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_true")]
    pub at_period_end: bool,
}

/// POST /api/billing/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Subscription> {
    identity.require_billing_admin()?;
    ok(state
        .engine
        .cancel(&identity.tenant_id, req.at_period_end)
        .await?)
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub plan: String,
    pub billing_cycle: String,
    pub price_id: Option<String>,
}

/// POST /api/billing/upgrade
pub async fn upgrade(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Json(req): Json<UpgradeRequest>,
) -> ApiResult<Subscription> {
    identity.require_billing_admin()?;
    let plan = parse_plan(&req.plan)?;
    let cycle = parse_cycle(&req.billing_cycle)?;

    ok(state
        .engine
        .upgrade(&identity.tenant_id, plan, cycle, req.price_id.as_deref())
        .await?)
}

/// POST /api/billing/reactivate
pub async fn reactivate(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<Subscription> {
    identity.require_billing_admin()?;
    ok(state.engine.reactivate(&identity.tenant_id).await?)
}

//! `AppError` and the `ApiResponse` envelope

use super::codes::ErrorCode;
use crate::billing::{BillingCycle, Currency, Plan};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Error returned to API clients: a code, a message and optional details
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    /// Structured context, e.g. the plan/cycle/currency that has no price
    pub details: Option<HashMap<String, Value>>,
}

impl AppError {
    /// Error with the code's default message
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    // ==================== Request ====================

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    pub fn not_authenticated() -> Self {
        Self::new(ErrorCode::NotAuthenticated)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::PermissionDenied, msg)
    }

    pub fn admin_required() -> Self {
        Self::new(ErrorCode::AdminRequired)
    }

    // ==================== Subscription ====================

    pub fn no_active_subscription() -> Self {
        Self::new(ErrorCode::NoActiveSubscription)
    }

    pub fn plan_not_purchasable(plan: Plan) -> Self {
        Self::with_message(
            ErrorCode::PlanNotPurchasable,
            format!("Plan '{}' cannot be purchased", plan.as_db()),
        )
        .with_detail("plan", plan.as_db())
    }

    pub fn price_not_configured(plan: Plan, cycle: BillingCycle, currency: Currency) -> Self {
        Self::new(ErrorCode::PriceNotConfigured)
            .with_detail("plan", plan.as_db())
            .with_detail("billing_cycle", cycle.as_db())
            .with_detail("currency", currency.code())
    }

    /// The live row is the free plan (or otherwise has no provider reference)
    pub fn not_upgradable_in_place() -> Self {
        Self::new(ErrorCode::FreePlanCannotUpgradeInPlace)
    }

    pub fn not_pending_cancellation() -> Self {
        Self::new(ErrorCode::SubscriptionNotPendingCancellation)
    }

    pub fn seat_limit_reached(current: i64, limit: i64, plan: Plan) -> Self {
        Self::with_message(
            ErrorCode::SeatLimitReached,
            format!(
                "Employee limit reached ({current}/{limit}) for the {} plan",
                plan.display_name()
            ),
        )
        .with_detail("current", current)
        .with_detail("limit", limit)
    }

    /// Version check or the one-live-subscription constraint lost a race
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ConcurrentModification, msg)
    }

    // ==================== Provider ====================

    /// Always the generic message: remote error internals never reach clients.
    pub fn provider_unavailable() -> Self {
        Self::new(ErrorCode::ProviderUnavailable)
    }

    pub fn webhook_signature_invalid() -> Self {
        Self::new(ErrorCode::WebhookSignatureInvalid)
    }

    pub fn webhook_payload_invalid() -> Self {
        Self::new(ErrorCode::WebhookPayloadInvalid)
    }

    // ==================== System ====================

    /// Opaque to the client; the cause is logged where it happened
    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalError)
    }
}

/// Response envelope: `code` 0 with `data` on success, the error code with
/// `message` and `details` on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Value>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: Some(ErrorCode::Success.code()),
            message: "OK".to_string(),
            data: Some(data),
            details: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(err: &AppError) -> Self {
        Self {
            code: Some(err.code.code()),
            message: err.message.clone(),
            data: None,
            details: err.details.clone(),
        }
    }
}

// ===== Axum Integration =====

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;

        let status = self.http_status();
        let body = ApiResponse::<()>::error(&self);

        if matches!(self.code.category(), super::category::ErrorCategory::System) {
            tracing::error!(
                code = %self.code,
                message = %self.message,
                "System error occurred"
            );
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_message() {
        let err = AppError::new(ErrorCode::NoActiveSubscription);
        assert_eq!(err.message, "No active subscription found");
        assert!(err.details.is_none());
        assert_eq!(format!("{err}"), "No active subscription found");
    }

    #[test]
    fn test_price_not_configured_names_the_offer() {
        let err =
            AppError::price_not_configured(Plan::Enterprise, BillingCycle::Yearly, Currency::Kwd);
        assert_eq!(err.code, ErrorCode::PriceNotConfigured);
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
        let details = err.details.unwrap();
        assert_eq!(details["plan"], "enterprise");
        assert_eq!(details["billing_cycle"], "yearly");
        assert_eq!(details["currency"], "KWD");
    }

    #[test]
    fn test_seat_limit_reached() {
        let err = AppError::seat_limit_reached(2, 2, Plan::Free);
        assert_eq!(err.code, ErrorCode::SeatLimitReached);
        assert!(err.message.contains("(2/2)"));
        assert_eq!(err.details.unwrap()["limit"], 2);
    }

    #[test]
    fn test_plan_not_purchasable() {
        let err = AppError::plan_not_purchasable(Plan::Free);
        assert_eq!(err.message, "Plan 'free' cannot be purchased");
    }

    #[test]
    fn test_provider_unavailable_is_generic() {
        let err = AppError::provider_unavailable();
        assert_eq!(err.http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            err.message,
            "Billing provider is unavailable, please try again later"
        );
    }

    #[test]
    fn test_error_envelope() {
        let err = AppError::validation("Unknown plan 'gold'").with_detail("field", "plan");
        let response = ApiResponse::<()>::error(&err);
        assert_eq!(response.code, Some(2));
        assert_eq!(response.message, "Unknown plan 'gold'");
        assert!(response.data.is_none());
        assert!(response.details.is_some());
    }

    #[test]
    fn test_success_envelope_serializes() {
        let json = serde_json::to_string(&ApiResponse::success("hello")).unwrap();
        assert!(json.contains("\"code\":0"));
        assert!(json.contains("\"message\":\"OK\""));
        assert!(json.contains("\"data\":\"hello\""));
        assert!(!json.contains("details"));
    }
}

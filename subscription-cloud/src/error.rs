//! Unified service-layer error type for subscription-cloud
//!
//! `ServiceError` bridges store errors, provider errors and the API-layer
//! `AppError`, so engine code can use `?` everywhere and handlers get the
//! right status code and an opaque message for infrastructure failures.

use axum::response::IntoResponse;
use shared::error::{AppError, ErrorCode};

use crate::db::StoreError;
use crate::stripe::ProviderError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Service-layer error
///
/// - `Db`: persistence/infrastructure errors (logged, mapped to InternalError)
/// - `Provider`: remote billing provider failed or timed out (mapped to ProviderUnavailable)
/// - `App`: business-rule errors (transparent pass-through to client)
#[derive(Debug)]
pub enum ServiceError {
    Db(BoxError),
    Provider(ProviderError),
    App(AppError),
}

impl ServiceError {
    /// Error code the client will see
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Db(_) => ErrorCode::InternalError,
            ServiceError::Provider(_) => ErrorCode::ProviderUnavailable,
            ServiceError::App(e) => e.code,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Db(e) => write!(f, "database error: {e}"),
            ServiceError::Provider(e) => write!(f, "provider error: {e}"),
            ServiceError::App(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            // Lost a race against the one-live-subscription index or a version check
            StoreError::Conflict(what) => ServiceError::App(AppError::conflict(what)),
            other => ServiceError::Db(other.into()),
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(e: ProviderError) -> Self {
        ServiceError::Provider(e)
    }
}

impl From<BoxError> for ServiceError {
    fn from(e: BoxError) -> Self {
        ServiceError::Db(e)
    }
}

impl From<AppError> for ServiceError {
    fn from(e: AppError) -> Self {
        ServiceError::App(e)
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::App(app_err) => app_err,
            ServiceError::Db(db_err) => {
                tracing::error!(error = %db_err, "Service database error");
                AppError::internal()
            }
            ServiceError::Provider(provider_err) => {
                tracing::error!(error = %provider_err, "Billing provider call failed");
                AppError::provider_unavailable()
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

/// Convenience type alias for service-layer results
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_opaque() {
        let err = ServiceError::from(ProviderError::Api {
            status: 402,
            message: "card_declined: secret internals".into(),
        });
        assert_eq!(err.code(), ErrorCode::ProviderUnavailable);

        let app: AppError = err.into();
        assert_eq!(app.code, ErrorCode::ProviderUnavailable);
        assert!(!app.message.contains("card_declined"));
    }

    #[test]
    fn test_store_conflict_maps_to_concurrent_modification() {
        let err = ServiceError::from(StoreError::Conflict("subscription version changed"));
        assert_eq!(err.code(), ErrorCode::ConcurrentModification);
    }

    #[test]
    fn test_corrupt_row_is_internal() {
        let err = ServiceError::from(StoreError::Corrupt("plan 'basic'".into()));
        assert_eq!(err.code(), ErrorCode::InternalError);
        let app: AppError = err.into();
        assert_eq!(app.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_app_error_passes_through() {
        let err = ServiceError::from(AppError::new(ErrorCode::PlanNotPurchasable));
        assert_eq!(err.code(), ErrorCode::PlanNotPurchasable);
    }
}

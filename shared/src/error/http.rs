//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Success => StatusCode::OK,

            Self::NoActiveSubscription => StatusCode::NOT_FOUND,

            Self::ConcurrentModification => StatusCode::CONFLICT,

            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,

            Self::PermissionDenied | Self::AdminRequired => StatusCode::FORBIDDEN,

            Self::SeatLimitReached => StatusCode::PAYMENT_REQUIRED,

            // Transient, the client may retry
            Self::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,

            Self::ValidationFailed
            | Self::PlanNotPurchasable
            | Self::PriceNotConfigured
            | Self::FreePlanCannotUpgradeInPlace
            | Self::SubscriptionNotPendingCancellation
            | Self::WebhookSignatureInvalid
            | Self::WebhookPayloadInvalid => StatusCode::BAD_REQUEST,
        }
    }
}

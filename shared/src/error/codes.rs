//! Error codes raised by the billing services
//!
//! Codes are grouped by range:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Tenant errors
//! - 4xxx: Subscription errors
//! - 5xxx: Payment / provider errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Billing error code, serialized as its u16 value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Request input rejected (unknown plan, cycle or currency, bad state)
    ValidationFailed = 2,

    // ==================== 1xxx: Auth ====================
    /// No tenant identity on the request
    NotAuthenticated = 1001,

    // ==================== 2xxx: Permission ====================
    /// Tenant role not recognised
    PermissionDenied = 2001,
    /// Billing changes need the admin or owner role
    AdminRequired = 2003,

    // ==================== 3xxx: Tenant ====================
    /// Seat limit of the current plan reached
    SeatLimitReached = 3007,

    // ==================== 4xxx: Subscription ====================
    /// No active or trialing subscription for tenant
    NoActiveSubscription = 4001,
    /// Plan cannot be bought through checkout
    PlanNotPurchasable = 4002,
    /// No price configured for plan / cycle / currency
    PriceNotConfigured = 4003,
    /// Subscription has no provider reference, cannot be changed in place
    FreePlanCannotUpgradeInPlace = 4004,
    /// Subscription has no pending cancellation to undo
    SubscriptionNotPendingCancellation = 4005,
    /// Subscription row changed concurrently, retry the operation
    ConcurrentModification = 4006,

    // ==================== 5xxx: Payment / Provider ====================
    /// Billing provider call failed or timed out
    ProviderUnavailable = 5001,
    /// Webhook signature verification failed
    WebhookSignatureInvalid = 5002,
    /// Webhook payload could not be decoded
    WebhookPayloadInvalid = 5003,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
}

impl ErrorCode {
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Default message for this code
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::ValidationFailed => "Validation failed",

            ErrorCode::NotAuthenticated => "Caller is not authenticated",

            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::AdminRequired => "Administrator role is required",

            ErrorCode::SeatLimitReached => {
                "Employee limit reached. Upgrade your plan to add more employees"
            }

            ErrorCode::NoActiveSubscription => "No active subscription found",
            ErrorCode::PlanNotPurchasable => "This plan cannot be purchased",
            ErrorCode::PriceNotConfigured => "Price not found for this plan",
            ErrorCode::FreePlanCannotUpgradeInPlace => "Cannot upgrade free plan this way",
            ErrorCode::SubscriptionNotPendingCancellation => {
                "Subscription is not scheduled for cancellation"
            }
            ErrorCode::ConcurrentModification => {
                "Subscription was modified concurrently, please retry"
            }

            ErrorCode::ProviderUnavailable => {
                "Billing provider is unavailable, please try again later"
            }
            ErrorCode::WebhookSignatureInvalid => "Webhook signature is invalid",
            ErrorCode::WebhookPayloadInvalid => "Webhook payload is invalid",

            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// A u16 that names no billing error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            0 => ErrorCode::Success,
            2 => ErrorCode::ValidationFailed,
            1001 => ErrorCode::NotAuthenticated,
            2001 => ErrorCode::PermissionDenied,
            2003 => ErrorCode::AdminRequired,
            3007 => ErrorCode::SeatLimitReached,
            4001 => ErrorCode::NoActiveSubscription,
            4002 => ErrorCode::PlanNotPurchasable,
            4003 => ErrorCode::PriceNotConfigured,
            4004 => ErrorCode::FreePlanCannotUpgradeInPlace,
            4005 => ErrorCode::SubscriptionNotPendingCancellation,
            4006 => ErrorCode::ConcurrentModification,
            5001 => ErrorCode::ProviderUnavailable,
            5002 => ErrorCode::WebhookSignatureInvalid,
            5003 => ErrorCode::WebhookPayloadInvalid,
            9001 => ErrorCode::InternalError,
            _ => return Err(InvalidErrorCode(value)),
        };
        Ok(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorCode; 16] = [
        ErrorCode::Success,
        ErrorCode::ValidationFailed,
        ErrorCode::NotAuthenticated,
        ErrorCode::PermissionDenied,
        ErrorCode::AdminRequired,
        ErrorCode::SeatLimitReached,
        ErrorCode::NoActiveSubscription,
        ErrorCode::PlanNotPurchasable,
        ErrorCode::PriceNotConfigured,
        ErrorCode::FreePlanCannotUpgradeInPlace,
        ErrorCode::SubscriptionNotPendingCancellation,
        ErrorCode::ConcurrentModification,
        ErrorCode::ProviderUnavailable,
        ErrorCode::WebhookSignatureInvalid,
        ErrorCode::WebhookPayloadInvalid,
        ErrorCode::InternalError,
    ];

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::SeatLimitReached.code(), 3007);
        assert_eq!(ErrorCode::NoActiveSubscription.code(), 4001);
        assert_eq!(ErrorCode::ConcurrentModification.code(), 4006);
        assert_eq!(ErrorCode::ProviderUnavailable.code(), 5001);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_try_from_accepts_every_code() {
        for code in ALL {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }

    #[test]
    fn test_try_from_rejects_unassigned_values() {
        assert_eq!(ErrorCode::try_from(1), Err(InvalidErrorCode(1)));
        assert_eq!(ErrorCode::try_from(4999), Err(InvalidErrorCode(4999)));
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&ErrorCode::PlanNotPurchasable).unwrap();
        assert_eq!(json, "4002");
        let code: ErrorCode = serde_json::from_str("5001").unwrap();
        assert_eq!(code, ErrorCode::ProviderUnavailable);
        assert!(serde_json::from_str::<ErrorCode>("3").is_err());
    }
}

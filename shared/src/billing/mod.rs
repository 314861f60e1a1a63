//! Billing domain enums shared between the billing service and its clients
//!
//! Every enum round-trips through its database string via `as_db` / `from_db`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Professional,
    Enterprise,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Professional, Plan::Enterprise];

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "professional" => Some(Self::Professional),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }

    /// Display name for plan listings
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Professional => "Professional",
            Self::Enterprise => "Enterprise",
        }
    }

    /// Only paid plans can be bought through checkout
    pub fn is_purchasable(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

/// Billing period of a subscription (`None` for the free plan)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    None,
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// Supported billing currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Kwd,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Usd, Currency::Kwd];

    /// Parse an ISO 4217 code, case-insensitive (the provider sends lowercase)
    pub fn from_code(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Some(Self::Usd),
            "KWD" => Some(Self::Kwd),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Kwd => "KWD",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Usd => "$",
            Self::Kwd => "KD",
        }
    }

    /// Number of decimal places in one major unit (KWD has fils = 1/1000)
    pub fn minor_unit_exponent(&self) -> u32 {
        match self {
            Self::Usd => 2,
            Self::Kwd => 3,
        }
    }

    /// Convert a provider minor-unit integer into a decimal amount
    pub fn from_minor_units(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.minor_unit_exponent())
    }

    /// Format an amount with the currency symbol, e.g. `$29.00`, `KD8.900`
    pub fn format(&self, amount: Decimal) -> String {
        let scale = self.minor_unit_exponent();
        let mut rounded = amount.round_dp(scale);
        rounded.rescale(scale);
        format!("{}{}", self.symbol(), rounded)
    }
}

/// Local subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }

    /// Map a provider status string onto the local enum.
    ///
    /// Statuses the local model has no slot for fold onto the nearest one:
    /// unpaid/incomplete/paused lose access like past_due, incomplete_expired
    /// is terminal.
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "unpaid" | "incomplete" | "paused" => Some(Self::PastDue),
            "incomplete_expired" => Some(Self::Canceled),
            other => Self::from_db(other),
        }
    }

    /// Active or trialing: the status set that grants plan entitlements
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Paid,
    Pending,
    Failed,
    Draft,
}

impl InvoiceStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "paid" => Some(Self::Paid),
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Draft => "draft",
        }
    }
}

/// Role of the authenticated caller inside its tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantRole {
    Superadmin,
    Admin,
    Member,
}

impl TenantRole {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "superadmin" => Some(Self::Superadmin),
            "admin" => Some(Self::Admin),
            "member" | "employee" => Some(Self::Member),
            _ => None,
        }
    }

    /// Can this caller change the tenant's subscription?
    pub fn can_manage_billing(&self) -> bool {
        matches!(self, Self::Admin | Self::Superadmin)
    }
}

//! Plan catalog: static limits, prices and provider price ids
//!
//! Pure lookups, no I/O. Unknown plan / cycle / currency combinations return
//! `None` ("not configured"); callers decide whether absence is fatal.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use shared::billing::{BillingCycle, Currency, Plan};

/// Plan -> limits mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    /// Seat count (employees)
    pub employees: i64,
    /// Analytics retention window in days
    pub analytics_days: i64,
    pub custom_logo: bool,
    pub api_access: bool,
    pub priority_support: bool,
    pub white_label: bool,
    pub custom_domain: bool,
}

const FREE_LIMITS: PlanLimits = PlanLimits {
    employees: 2,
    analytics_days: 30,
    custom_logo: false,
    api_access: false,
    priority_support: false,
    white_label: false,
    custom_domain: false,
};

const PROFESSIONAL_LIMITS: PlanLimits = PlanLimits {
    employees: 50,
    analytics_days: 365,
    custom_logo: true,
    api_access: false,
    priority_support: true,
    white_label: false,
    custom_domain: false,
};

// Enterprise numbers stand in for "unlimited"
const ENTERPRISE_LIMITS: PlanLimits = PlanLimits {
    employees: 999_999,
    analytics_days: 9_999,
    custom_logo: true,
    api_access: true,
    priority_support: true,
    white_label: true,
    custom_domain: true,
};

pub fn limits_for(plan: Plan) -> &'static PlanLimits {
    match plan {
        Plan::Free => &FREE_LIMITS,
        Plan::Professional => &PROFESSIONAL_LIMITS,
        Plan::Enterprise => &ENTERPRISE_LIMITS,
    }
}

/// List price of a plan. Free costs zero in every cycle; paid plans have no
/// price for the `None` cycle.
pub fn price_for(plan: Plan, cycle: BillingCycle, currency: Currency) -> Option<Decimal> {
    use BillingCycle::*;
    use Currency::*;
    use Plan::*;

    let (minor, exp) = match (plan, cycle, currency) {
        (Free, _, _) => (0, 0),
        (_, None, _) => return Option::None,
        (Professional, Monthly, Usd) => (2900, 2),
        (Professional, Yearly, Usd) => (29000, 2),
        (Enterprise, Monthly, Usd) => (9900, 2),
        (Enterprise, Yearly, Usd) => (99000, 2),
        (Professional, Monthly, Kwd) => (8900, 3),
        (Professional, Yearly, Kwd) => (89000, 3),
        (Enterprise, Monthly, Kwd) => (30500, 3),
        (Enterprise, Yearly, Kwd) => (305000, 3),
    };
    Some(Decimal::new(minor, exp))
}

/// Marketing bullet points shown in the plan listing
pub fn features_for(plan: Plan) -> &'static [&'static str] {
    match plan {
        Plan::Free => &[
            "Up to 2 employees",
            "Basic branding (color only)",
            "Basic analytics (30 days)",
            "QR codes & vCards",
            "Email support",
        ],
        Plan::Professional => &[
            "Up to 50 employees",
            "Full branding (color + logo)",
            "Advanced analytics (365 days)",
            "QR codes & vCards",
            "Priority email support",
        ],
        Plan::Enterprise => &[
            "Unlimited employees",
            "Full branding + white label",
            "Advanced analytics + exports",
            "API access",
            "Priority support",
            "Custom domain",
        ],
    }
}

type PriceKey = (Plan, BillingCycle, Currency);

/// Provider price ids, one per purchasable (plan, cycle, currency)
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    ids: HashMap<PriceKey, String>,
}

impl PriceIds {
    /// Build from a variable lookup, falling back to `price_<plan>_<currency>_<cycle>`.
    ///
    /// Variable names follow `STRIPE_PRICE_<PLAN>_<CURRENCY>_<CYCLE>`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut ids = HashMap::new();
        for plan in Plan::ALL.into_iter().filter(Plan::is_purchasable) {
            for cycle in [BillingCycle::Monthly, BillingCycle::Yearly] {
                for currency in Currency::ALL {
                    let var = format!(
                        "STRIPE_PRICE_{}_{}_{}",
                        plan.as_db().to_ascii_uppercase(),
                        currency.code(),
                        cycle.as_db().to_ascii_uppercase()
                    );
                    let id = lookup(&var).filter(|v| !v.is_empty()).unwrap_or_else(|| {
                        format!(
                            "price_{}_{}_{}",
                            plan.as_db(),
                            currency.code().to_ascii_lowercase(),
                            cycle.as_db()
                        )
                    });
                    ids.insert((plan, cycle, currency), id);
                }
            }
        }
        Self { ids }
    }

    pub fn get(&self, plan: Plan, cycle: BillingCycle, currency: Currency) -> Option<&str> {
        self.ids.get(&(plan, cycle, currency)).map(String::as_str)
    }

    /// Reverse lookup, used when the provider reports a price change made
    /// outside our checkout (e.g. in the hosted portal).
    pub fn resolve(&self, price_id: &str) -> Option<(Plan, BillingCycle, Currency)> {
        self.ids
            .iter()
            .find(|(_, id)| id.as_str() == price_id)
            .map(|(key, _)| *key)
    }
}

/// One plan as shown on the pricing page
#[derive(Debug, Clone, Serialize)]
pub struct PlanOffer {
    pub id: Plan,
    pub name: &'static str,
    pub features: &'static [&'static str],
    pub limits: PlanLimits,
    pub pricing: Vec<OfferPrice>,
    pub trial_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferPrice {
    pub currency: Currency,
    pub symbol: &'static str,
    pub monthly: Decimal,
    pub yearly: Decimal,
}

/// Plan catalog bound to the deployment's provider price ids
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    price_ids: PriceIds,
    trial_days: u32,
}

impl PlanCatalog {
    pub fn new(price_ids: PriceIds, trial_days: u32) -> Self {
        Self {
            price_ids,
            trial_days,
        }
    }

    pub fn limits_for(&self, plan: Plan) -> &'static PlanLimits {
        limits_for(plan)
    }

    pub fn price_for(&self, plan: Plan, cycle: BillingCycle, currency: Currency) -> Option<Decimal> {
        price_for(plan, cycle, currency)
    }

    /// Provider price id; `None` for free or unconfigured combinations
    pub fn price_id_for(&self, plan: Plan, cycle: BillingCycle, currency: Currency) -> Option<&str> {
        if !plan.is_purchasable() {
            return None;
        }
        self.price_ids.get(plan, cycle, currency)
    }

    pub fn resolve_price_id(&self, price_id: &str) -> Option<(Plan, BillingCycle, Currency)> {
        self.price_ids.resolve(price_id)
    }

    pub fn trial_days(&self) -> u32 {
        self.trial_days
    }

    pub fn offers(&self) -> Vec<PlanOffer> {
        Plan::ALL
            .into_iter()
            .map(|plan| PlanOffer {
                id: plan,
                name: plan.display_name(),
                features: features_for(plan),
                limits: *limits_for(plan),
                pricing: Currency::ALL
                    .into_iter()
                    .map(|currency| OfferPrice {
                        currency,
                        symbol: currency.symbol(),
                        monthly: price_for(plan, BillingCycle::Monthly, currency)
                            .unwrap_or_default(),
                        yearly: price_for(plan, BillingCycle::Yearly, currency)
                            .unwrap_or_default(),
                    })
                    .collect(),
                trial_days: if plan.is_purchasable() {
                    self.trial_days
                } else {
                    0
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(PriceIds::from_lookup(|_| None), 3)
    }

    #[test]
    fn test_free_plan_limits() {
        let limits = limits_for(Plan::Free);
        assert_eq!(limits.employees, 2);
        assert_eq!(limits.analytics_days, 30);
        assert!(!limits.custom_logo);
        assert!(!limits.api_access);
    }

    #[test]
    fn test_enterprise_has_every_feature() {
        let limits = limits_for(Plan::Enterprise);
        assert!(limits.api_access && limits.white_label && limits.custom_domain);
        assert!(limits.employees > limits_for(Plan::Professional).employees);
    }

    #[test]
    fn test_prices() {
        assert_eq!(
            price_for(Plan::Professional, BillingCycle::Monthly, Currency::Usd),
            Some(Decimal::new(29, 0))
        );
        assert_eq!(
            price_for(Plan::Enterprise, BillingCycle::Yearly, Currency::Kwd),
            Some(Decimal::new(305, 0))
        );
        assert_eq!(
            price_for(Plan::Free, BillingCycle::None, Currency::Usd),
            Some(Decimal::ZERO)
        );
    }

    #[test]
    fn test_paid_plan_without_cycle_is_not_configured() {
        assert_eq!(
            price_for(Plan::Professional, BillingCycle::None, Currency::Usd),
            None
        );
        assert_eq!(
            catalog().price_id_for(Plan::Enterprise, BillingCycle::None, Currency::Usd),
            None
        );
    }

    #[test]
    fn test_default_price_ids() {
        let catalog = catalog();
        assert_eq!(
            catalog.price_id_for(Plan::Professional, BillingCycle::Monthly, Currency::Usd),
            Some("price_professional_usd_monthly")
        );
        assert_eq!(
            catalog.price_id_for(Plan::Enterprise, BillingCycle::Yearly, Currency::Kwd),
            Some("price_enterprise_kwd_yearly")
        );
        assert_eq!(
            catalog.price_id_for(Plan::Free, BillingCycle::Monthly, Currency::Usd),
            None
        );
    }

    #[test]
    fn test_price_id_override_and_reverse_lookup() {
        let ids = PriceIds::from_lookup(|name| {
            (name == "STRIPE_PRICE_PROFESSIONAL_USD_MONTHLY").then(|| "price_live_123".to_string())
        });
        assert_eq!(
            ids.get(Plan::Professional, BillingCycle::Monthly, Currency::Usd),
            Some("price_live_123")
        );
        assert_eq!(
            ids.resolve("price_live_123"),
            Some((Plan::Professional, BillingCycle::Monthly, Currency::Usd))
        );
        assert_eq!(ids.resolve("price_unknown"), None);
    }

    #[test]
    fn test_offers_list_every_plan() {
        let offers = catalog().offers();
        assert_eq!(offers.len(), 3);
        assert_eq!(offers[0].id, Plan::Free);
        assert_eq!(offers[0].trial_days, 0);
        assert_eq!(offers[1].trial_days, 3);
        assert_eq!(offers[2].pricing.len(), 2);
    }
}

//! Subscription state machine and webhook reconciliation

pub mod engine;
pub mod locks;
pub mod reconciler;

pub use engine::{
    CurrentSubscription, EngineSettings, InvoiceSyncReport, PaidSubscription, SeatUsage,
    SubscriptionEngine, UpcomingInvoice,
};
pub use locks::TenantLocks;
pub use reconciler::{ReconcileOutcome, WebhookError, WebhookReconciler};

//! Caller identity for the tenant billing API

pub mod identity;

pub use identity::{TenantIdentity, tenant_identity_middleware};

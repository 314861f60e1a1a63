//! Tenant identity from the upstream auth gateway
//!
//! The gateway authenticates the caller and forwards `x-tenant-id` and
//! `x-tenant-role`. Requests without a tenant id never reach a handler.

use axum::{extract::Request, middleware::Next, response::Response};
use shared::billing::TenantRole;
use shared::error::AppError;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const TENANT_ROLE_HEADER: &str = "x-tenant-role";

/// Authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct TenantIdentity {
    pub tenant_id: String,
    pub role: TenantRole,
}

impl TenantIdentity {
    /// Subscription changes are limited to tenant admins
    pub fn require_billing_admin(&self) -> Result<(), AppError> {
        if self.role.can_manage_billing() {
            Ok(())
        } else {
            tracing::debug!(tenant_id = %self.tenant_id, role = ?self.role, "Billing change denied");
            Err(AppError::admin_required())
        }
    }
}

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Middleware that extracts [`TenantIdentity`] from the gateway headers
pub async fn tenant_identity_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let tenant_id = header(&request, TENANT_ID_HEADER)
        .ok_or_else(AppError::not_authenticated)?
        .to_string();

    // No role header means an ordinary member
    let role = match header(&request, TENANT_ROLE_HEADER) {
        Some(raw) => TenantRole::from_db(raw)
            .ok_or_else(|| AppError::permission_denied(format!("Unknown tenant role '{raw}'")))?,
        None => TenantRole::Member,
    };

    request
        .extensions_mut()
        .insert(TenantIdentity { tenant_id, role });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::ErrorCode;

    #[test]
    fn test_only_admins_manage_billing() {
        let identity = |role| TenantIdentity {
            tenant_id: "t1".into(),
            role,
        };
        assert!(identity(TenantRole::Admin).require_billing_admin().is_ok());
        assert!(identity(TenantRole::Superadmin).require_billing_admin().is_ok());
        let err = identity(TenantRole::Member)
            .require_billing_admin()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AdminRequired);
    }
}

use axum::http::HeaderMap;
use thiserror::Error;

use forgeproc_core::TenantId;

/// Header carrying the caller's tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant context for a request.
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantResolutionError {
    #[error("missing tenant")]
    Missing,
    #[error("invalid tenant: {0}")]
    Invalid(String),
}

/// Resolves the tenant a request acts for.
///
/// Authentication lives outside this engine; a resolver only maps an already
/// trusted request onto a [`TenantId`].
pub trait TenantResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<TenantId, TenantResolutionError>;
}

/// Reads the tenant id from the `x-tenant-id` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderTenantResolver;

impl TenantResolver for HeaderTenantResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<TenantId, TenantResolutionError> {
        let raw = headers
            .get(TENANT_HEADER)
            .ok_or(TenantResolutionError::Missing)?
            .to_str()
            .map_err(|_| TenantResolutionError::Invalid("header is not valid ASCII".to_string()))?
            .trim();
        if raw.is_empty() {
            return Err(TenantResolutionError::Missing);
        }
        raw.parse()
            .map_err(|e: forgeproc_core::DomainError| TenantResolutionError::Invalid(e.to_string()))
    }
}

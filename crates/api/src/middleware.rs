use std::sync::Arc;

use axum::{extract::State, http::StatusCode, middleware::Next, response::Response};

use crate::app::errors;
use crate::context::{TenantContext, TenantResolutionError, TenantResolver};

#[derive(Clone)]
pub struct TenantState {
    pub resolver: Arc<dyn TenantResolver>,
}

pub async fn tenant_middleware(
    State(state): State<TenantState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let tenant_id = state.resolver.resolve(req.headers()).map_err(|e| match e {
        TenantResolutionError::Missing => {
            errors::json_error(StatusCode::UNAUTHORIZED, "missing_tenant", e.to_string())
        }
        TenantResolutionError::Invalid(_) => {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_tenant", e.to_string())
        }
    })?;

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    Ok(next.run(req).await)
}

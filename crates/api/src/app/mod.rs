//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store/audit wiring behind the lifecycle service
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use forgeproc_infra::EngineConfig;

use crate::context::{HeaderTenantResolver, TenantResolver};
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from configuration (public entrypoint used by `main.rs`).
pub async fn build_app(config: &EngineConfig) -> anyhow::Result<Router> {
    let services = services::build_services(config).await?;
    Ok(router_with(Arc::new(services), Arc::new(HeaderTenantResolver)))
}

/// Build the router around already constructed services.
pub fn router_with(services: Arc<services::AppServices>, resolver: Arc<dyn TenantResolver>) -> Router {
    let tenant_state = middleware::TenantState { resolver };

    // Tenant-scoped routes.
    let scoped = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            tenant_state,
            middleware::tenant_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(scoped)
        .layer(ServiceBuilder::new())
}

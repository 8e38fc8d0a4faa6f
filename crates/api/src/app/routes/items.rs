use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use forgeproc_inventory::ItemId;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new().route("/:id/ledger", get(get_stock_ledger))
}

/// Current stock of an item and every movement recorded against it.
pub async fn get_stock_ledger(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let item_id: ItemId = match errors::parse_id(&id, "item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.lifecycle.stock_ledger(tenant.tenant_id(), item_id).await {
        Ok(ledger) => (StatusCode::OK, Json(ledger)).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

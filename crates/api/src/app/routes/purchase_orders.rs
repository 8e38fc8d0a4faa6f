use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use forgeproc_purchasing::{OrderFieldsPatch, PurchaseOrderId, PurchaseOrderStatus, ReceiptLine};

use crate::app::dto::{self, OutcomeResponse};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route(
            "/:id",
            get(get_purchase_order)
                .patch(update_purchase_order_fields)
                .delete(delete_purchase_order),
        )
        .route("/:id/lines", put(replace_purchase_order_lines))
        .route("/:id/receipts", post(record_purchase_order_receipt))
        .route("/:id/status", post(force_purchase_order_status))
        .route("/:id/cancel", post(cancel_purchase_order))
}

fn order_id(raw: &str) -> Result<PurchaseOrderId, axum::response::Response> {
    errors::parse_id(raw, "purchase order")
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreatePurchaseOrderRequest>,
) -> axum::response::Response {
    match services
        .lifecycle
        .create(tenant.tenant_id(), &body.order_number, &body.lines)
        .await
    {
        Ok(outcome) => (StatusCode::CREATED, Json(OutcomeResponse::from(outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn list_purchase_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.lifecycle.list(tenant.tenant_id()).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn get_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.lifecycle.get(tenant.tenant_id(), order_id).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn replace_purchase_order_lines(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReplaceLinesRequest>,
) -> axum::response::Response {
    let order_id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .lifecycle
        .update_lines(tenant.tenant_id(), order_id, &body.lines)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(OutcomeResponse::from(outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn record_purchase_order_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordReceiptRequest>,
) -> axum::response::Response {
    let order_id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let receipts = match body
        .receipts
        .iter()
        .map(dto::ReceiptEntryRequest::to_receipt_line)
        .collect::<Result<Vec<ReceiptLine>, _>>()
    {
        Ok(v) => v,
        Err(e) => return errors::lifecycle_error_to_response(e.into()),
    };
    match services
        .lifecycle
        .record_receipt(tenant.tenant_id(), order_id, &receipts)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(OutcomeResponse::from(outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn update_purchase_order_fields(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(patch): Json<OrderFieldsPatch>,
) -> axum::response::Response {
    let order_id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .lifecycle
        .update_fields(tenant.tenant_id(), order_id, &patch)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(OutcomeResponse::from(outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn force_purchase_order_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ForceStatusRequest>,
) -> axum::response::Response {
    let order_id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status: PurchaseOrderStatus = match body.status.parse() {
        Ok(v) => v,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", format!("{e}")),
    };
    match services
        .lifecycle
        .force_status(tenant.tenant_id(), order_id, status, body.reason)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(OutcomeResponse::from(outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn cancel_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelRequest>>,
) -> axum::response::Response {
    let order_id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    match services.lifecycle.cancel(tenant.tenant_id(), order_id, reason).await {
        Ok(outcome) => (StatusCode::OK, Json(OutcomeResponse::from(outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn delete_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.lifecycle.delete(tenant.tenant_id(), order_id).await {
        Ok(outcome) if outcome.has_warnings() => {
            (StatusCode::OK, Json(serde_json::json!({ "warnings": outcome.warnings }))).into_response()
        }
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

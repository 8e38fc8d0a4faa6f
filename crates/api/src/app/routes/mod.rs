use axum::Router;

pub mod items;
pub mod purchase_orders;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/purchase-orders", purchase_orders::router())
        .nest("/items", items::router())
}

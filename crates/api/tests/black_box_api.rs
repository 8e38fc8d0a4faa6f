use std::sync::Arc;
use std::time::Duration;

use forgeproc_api::app::{router_with, services::AppServices};
use forgeproc_api::context::HeaderTenantResolver;
use forgeproc_core::TenantId;
use forgeproc_infra::InMemoryPurchaseOrderStore;
use forgeproc_inventory::{Item, ItemId};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    store: InMemoryPurchaseOrderStore,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory store, ephemeral port.
        let store = InMemoryPurchaseOrderStore::new();
        let services = Arc::new(AppServices::in_memory(store.clone(), Duration::from_secs(2)));
        let app = router_with(services, Arc::new(HeaderTenantResolver));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            handle,
        }
    }

    async fn seed_item(&self, tenant_id: TenantId, name: &str, quantity: i64) -> ItemId {
        let item_id = ItemId::generate();
        self.store.put_item(Item::new(tenant_id, item_id, name, quantity)).await;
        item_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn line_id_for(order: &Value, item_id: ItemId) -> String {
    order["lines"]
        .as_array()
        .unwrap()
        .iter()
        .find(|l| l["item_id"] == item_id.to_string())
        .unwrap()["line_id"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn create_order(
    client: &reqwest::Client,
    srv: &TestServer,
    tenant_id: TenantId,
    lines: Value,
) -> Value {
    let res = client
        .post(srv.url("/purchase-orders"))
        .header("x-tenant-id", tenant_id.to_string())
        .json(&json!({ "order_number": "PO-1001", "lines": lines }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_header_required_for_scoped_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/purchase-orders")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/purchase-orders"))
        .header("x-tenant-id", "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_tenant");
}

#[tokio::test]
async fn receipts_drive_status_and_stock() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant_id = TenantId::new();
    let x = srv.seed_item(tenant_id, "widget", 0).await;
    let y = srv.seed_item(tenant_id, "gadget", 0).await;

    let created = create_order(
        &client,
        &srv,
        tenant_id,
        json!([
            { "item_id": x, "quantity_ordered": 10 },
            { "item_id": y, "quantity_ordered": "5" },
        ]),
    )
    .await;
    assert_eq!(created["order"]["status"], "DRAFT");
    assert!(created.get("warnings").is_none());
    let order_id = created["order"]["order_id"].as_str().unwrap().to_string();
    let x_line = line_id_for(&created, x);
    let y_line = line_id_for(&created, y);

    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/receipts")))
        .header("x-tenant-id", tenant_id.to_string())
        .json(&json!({ "receipts": [{ "line_id": x_line, "new_delivery": 4 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["order"]["order"]["status"], "PARTIALLY_RECEIVED");

    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/receipts")))
        .header("x-tenant-id", tenant_id.to_string())
        .json(&json!({ "receipts": [
            { "line_id": x_line, "quantity_received_total": 10 },
            { "line_id": y_line, "quantity_received_total": 5 },
        ] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["order"]["order"]["status"], "FULLY_RECEIVED");
    let deltas: Vec<i64> = report["applied"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["delta"].as_i64().unwrap())
        .collect();
    assert_eq!(deltas, vec![6, 5]);

    let res = client
        .get(srv.url(&format!("/items/{x}/ledger")))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ledger: Value = res.json().await.unwrap();
    assert_eq!(ledger["item"]["quantity"], 10);
    assert_eq!(ledger["movements"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_line_batch_is_rejected_without_changes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant_id = TenantId::new();
    let x = srv.seed_item(tenant_id, "widget", 0).await;

    let created = create_order(&client, &srv, tenant_id, json!([{ "item_id": x, "quantity_ordered": 10 }])).await;
    let order_id = created["order"]["order_id"].as_str().unwrap().to_string();

    let res = client
        .put(srv.url(&format!("/purchase-orders/{order_id}/lines")))
        .header("x-tenant-id", tenant_id.to_string())
        .json(&json!({ "lines": [{ "item_id": x, "quantity_ordered": -1 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .get(srv.url(&format!("/purchase-orders/{order_id}")))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    let current: Value = res.json().await.unwrap();
    assert_eq!(current["lines"], created["lines"]);
}

#[tokio::test]
async fn other_tenants_see_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let owner = TenantId::new();
    let intruder = TenantId::new();
    let x = srv.seed_item(owner, "widget", 0).await;

    let created = create_order(&client, &srv, owner, json!([{ "item_id": x, "quantity_ordered": 3 }])).await;
    let order_id = created["order"]["order_id"].as_str().unwrap().to_string();

    let res = client
        .get(srv.url(&format!("/purchase-orders/{order_id}")))
        .header("x-tenant-id", intruder.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .delete(srv.url(&format!("/purchase-orders/{order_id}")))
        .header("x-tenant-id", intruder.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/purchase-orders"))
        .header("x-tenant-id", intruder.to_string())
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn status_override_cancel_and_delete() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant_id = TenantId::new();
    let x = srv.seed_item(tenant_id, "widget", 0).await;

    let created = create_order(&client, &srv, tenant_id, json!([{ "item_id": x, "quantity_ordered": 3 }])).await;
    let order_id = created["order"]["order_id"].as_str().unwrap().to_string();

    let res = client
        .patch(srv.url(&format!("/purchase-orders/{order_id}")))
        .header("x-tenant-id", tenant_id.to_string())
        .json(&json!({ "status": "SHIPPED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/status")))
        .header("x-tenant-id", tenant_id.to_string())
        .json(&json!({ "status": "ORDERED", "reason": "sent to supplier" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["order"]["status"], "ORDERED");

    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/cancel")))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["order"]["status"], "CANCELLED");

    let res = client
        .delete(srv.url(&format!("/purchase-orders/{order_id}")))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url(&format!("/purchase-orders/{order_id}")))
        .header("x-tenant-id", tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_order_number_conflicts() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant_id = TenantId::new();

    create_order(&client, &srv, tenant_id, json!([])).await;
    let res = client
        .post(srv.url("/purchase-orders"))
        .header("x-tenant-id", tenant_id.to_string())
        .json(&json!({ "order_number": "PO-1001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

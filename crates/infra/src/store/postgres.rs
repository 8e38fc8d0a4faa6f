//! Postgres-backed purchase order store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate order number, or two lines for one item at commit |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent transaction conflict |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Lock cycle between concurrent receipts |
//! | Database (lock not available) | `55P03` | `Timeout` | Row lock not granted within `lock_timeout` |
//! | Database (query canceled) | `57014` | `Timeout` | Statement canceled while waiting |
//! | Database (other) | Any other | `Storage` | Check constraint, foreign key, ... |
//! | PoolTimedOut | N/A | `Timeout` | No connection available within `acquire_timeout` |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! ## Locking
//!
//! `load_order` takes `FOR UPDATE` on the order row, so two lifecycle
//! operations on the same order serialize. Stock increments are single
//! `UPDATE ... SET quantity = quantity + $delta` statements and compose across
//! orders without any application-level read.
//!
//! Every transaction runs with `SET LOCAL lock_timeout` equal to the store's
//! lock timeout, so a unit of work queued behind another one on the same order
//! or item fails with `Timeout` instead of waiting indefinitely.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use forgeproc_core::{AggregateId, ExpectedVersion, TenantId};
use forgeproc_inventory::{Item, ItemId, MovementReason, MovementSource, StockMovement, StockMovementId};
use forgeproc_purchasing::{
    LineId, OrderNumber, PurchaseOrder, PurchaseOrderId, PurchaseOrderLine, PurchaseOrderStatus,
};

use super::{PurchaseOrderStore, StoreError, UnitOfWork};

const SCHEMA: &str = include_str!("../../migrations/0001_purchase_orders.sql");

const ORDER_COLUMNS: &str = r#"
    tenant_id, order_id, order_number, status, notes, total_amount, delivery_charge,
    ordered_at, invoice_date, invoice_ref, materials_request_id, version, created_at, updated_at
"#;

const LINE_COLUMNS: &str = r#"
    line_id, order_id, item_id, quantity_ordered, quantity_received, unit_price, notes
"#;

/// Postgres-backed purchase order store.
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync). Each
/// unit of work owns one pooled connection inside an open transaction.
#[derive(Debug, Clone)]
pub struct PostgresPurchaseOrderStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresPurchaseOrderStore {
    /// Wrap an existing pool. `lock_timeout` bounds every row-lock wait.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    /// Connect with a bounded pool. `tx_timeout` bounds both connection
    /// acquisition and row-lock waits.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        tx_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(tx_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, tx_timeout))
    }

    /// Create the tables this store needs if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Register (or rename) an item for a tenant without touching its stock.
    #[instrument(skip(self, item), fields(tenant_id = %item.tenant_id.as_uuid(), item_id = %item.item_id), err)]
    pub async fn put_item(&self, item: &Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO items (tenant_id, item_id, name, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, item_id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(item.tenant_id.as_uuid())
        .bind(item.item_id.as_uuid())
        .bind(&item.name)
        .bind(item.quantity)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_item", e))?;
        Ok(())
    }
}

#[async_trait]
impl PurchaseOrderStore for PostgresPurchaseOrderStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    async fn begin(&self, tenant_id: TenantId) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET takes no bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            lock_timeout_ms(self.lock_timeout)
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PostgresUnitOfWork { tenant_id, tx }))
    }
}

/// One open transaction, bound to a tenant.
pub struct PostgresUnitOfWork {
    tenant_id: TenantId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn load_order(&mut self, order_id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE tenant_id = $1 AND order_id = $2 FOR UPDATE"
        ))
        .bind(self.tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_order", e))?;

        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn list_orders(&mut self) -> Result<Vec<PurchaseOrder>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE tenant_id = $1 ORDER BY created_at DESC, order_id DESC"
        ))
        .bind(self.tenant_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;

        rows.iter().map(order_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn load_lines(&mut self, order_id: PurchaseOrderId) -> Result<Vec<PurchaseOrderLine>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM purchase_order_lines WHERE tenant_id = $1 AND order_id = $2 ORDER BY position"
        ))
        .bind(self.tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?;

        rows.iter().map(line_from_row).collect()
    }

    #[instrument(skip(self, item_ids), fields(tenant_id = %self.tenant_id.as_uuid(), count = item_ids.len()), err)]
    async fn owned_items(&mut self, item_ids: &[ItemId]) -> Result<HashSet<ItemId>, StoreError> {
        if item_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let ids: Vec<Uuid> = item_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query("SELECT item_id FROM items WHERE tenant_id = $1 AND item_id = ANY($2)")
            .bind(self.tenant_id.as_uuid())
            .bind(&ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("owned_items", e))?;

        rows.iter()
            .map(|row| get::<Uuid>(row, "item_id").map(ItemId::from))
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn load_item(&mut self, item_id: ItemId) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query(
            "SELECT tenant_id, item_id, name, quantity FROM items WHERE tenant_id = $1 AND item_id = $2",
        )
        .bind(self.tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_item", e))?;

        row.map(|row| {
            Ok(Item {
                tenant_id: TenantId::from_uuid(get(&row, "tenant_id")?),
                item_id: ItemId::from(get::<Uuid>(&row, "item_id")?),
                name: get(&row, "name")?,
                quantity: get(&row, "quantity")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, order), fields(tenant_id = %self.tenant_id.as_uuid(), order_id = %order.order_id), err)]
    async fn insert_order(&mut self, order: &PurchaseOrder) -> Result<u64, StoreError> {
        sqlx::query(&format!(
            "INSERT INTO purchase_orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1, $12, $13)"
        ))
        .bind(self.tenant_id.as_uuid())
        .bind(order.order_id.as_uuid())
        .bind(order.order_number.as_str())
        .bind(order.status.as_str())
        .bind(&order.notes)
        .bind(order.total_amount)
        .bind(order.delivery_charge)
        .bind(order.ordered_at)
        .bind(order.invoice_date)
        .bind(&order.invoice_ref)
        .bind(order.materials_request_id.map(|id| *id.as_uuid()))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        Ok(1)
    }

    #[instrument(
        skip(self, order),
        fields(tenant_id = %self.tenant_id.as_uuid(), order_id = %order.order_id, expected = ?expected),
        err
    )]
    async fn update_order(
        &mut self,
        order: &PurchaseOrder,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError> {
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
        };

        let row = sqlx::query(
            r#"
            UPDATE purchase_orders SET
                status = $3,
                notes = $4,
                total_amount = $5,
                delivery_charge = $6,
                ordered_at = $7,
                invoice_date = $8,
                invoice_ref = $9,
                materials_request_id = $10,
                updated_at = $11,
                version = version + 1
            WHERE tenant_id = $1 AND order_id = $2 AND ($12::BIGINT IS NULL OR version = $12)
            RETURNING version
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .bind(order.order_id.as_uuid())
        .bind(order.status.as_str())
        .bind(&order.notes)
        .bind(order.total_amount)
        .bind(order.delivery_charge)
        .bind(order.ordered_at)
        .bind(order.invoice_date)
        .bind(&order.invoice_ref)
        .bind(order.materials_request_id.map(|id| *id.as_uuid()))
        .bind(order.updated_at)
        .bind(expected_version)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_order", e))?;

        match row {
            Some(row) => Ok(get::<i64>(&row, "version")? as u64),
            None if expected_version.is_some() => Err(StoreError::Conflict(format!(
                "purchase order {} is not at version {expected:?}",
                order.order_id
            ))),
            None => Err(StoreError::NotFound(format!("purchase order {}", order.order_id))),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn delete_order(&mut self, order_id: PurchaseOrderId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM purchase_orders WHERE tenant_id = $1 AND order_id = $2")
            .bind(self.tenant_id.as_uuid())
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("purchase order {order_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, line), fields(tenant_id = %self.tenant_id.as_uuid(), line_id = %line.line_id), err)]
    async fn insert_line(&mut self, line: &PurchaseOrderLine) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO purchase_order_lines (
                tenant_id, line_id, order_id, item_id, quantity_ordered, quantity_received, unit_price, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .bind(line.line_id.as_uuid())
        .bind(line.order_id.as_uuid())
        .bind(line.item_id.as_uuid())
        .bind(line.quantity_ordered)
        .bind(line.quantity_received)
        .bind(line.unit_price)
        .bind(&line.notes)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
        Ok(())
    }

    #[instrument(skip(self, line), fields(tenant_id = %self.tenant_id.as_uuid(), line_id = %line.line_id), err)]
    async fn update_line(&mut self, line: &PurchaseOrderLine) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_order_lines SET
                item_id = $4,
                quantity_ordered = $5,
                quantity_received = $6,
                unit_price = $7,
                notes = $8
            WHERE tenant_id = $1 AND order_id = $2 AND line_id = $3
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .bind(line.order_id.as_uuid())
        .bind(line.line_id.as_uuid())
        .bind(line.item_id.as_uuid())
        .bind(line.quantity_ordered)
        .bind(line.quantity_received)
        .bind(line.unit_price)
        .bind(&line.notes)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_line", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("line {}", line.line_id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn delete_line(&mut self, order_id: PurchaseOrderId, line_id: LineId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM purchase_order_lines WHERE tenant_id = $1 AND order_id = $2 AND line_id = $3",
        )
        .bind(self.tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(line_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_line", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("line {line_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn increment_stock(&mut self, item_id: ItemId, delta: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "UPDATE items SET quantity = quantity + $3 WHERE tenant_id = $1 AND item_id = $2 RETURNING quantity",
        )
        .bind(self.tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("increment_stock", e))?;

        match row {
            Some(row) => get(&row, "quantity"),
            None => Err(StoreError::NotFound(format!("item {item_id}"))),
        }
    }

    #[instrument(skip(self, movement), fields(tenant_id = %self.tenant_id.as_uuid(), item_id = %movement.item_id), err)]
    async fn record_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                tenant_id, movement_id, item_id, delta, order_id, line_id, reason, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .bind(movement.movement_id.as_uuid())
        .bind(movement.item_id.as_uuid())
        .bind(movement.delta)
        .bind(movement.source.order_id.as_uuid())
        .bind(movement.source.line_id.as_uuid())
        .bind(movement.reason.as_str())
        .bind(movement.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("record_movement", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn item_movements(&mut self, item_id: ItemId) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT movement_id, item_id, delta, order_id, line_id, reason, recorded_at
            FROM stock_movements
            WHERE tenant_id = $1 AND item_id = $2
            ORDER BY recorded_at ASC, movement_id ASC
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("item_movements", e))?;

        let tenant_id = self.tenant_id;
        rows.iter()
            .map(|row| {
                let reason: String = get(row, "reason")?;
                Ok(StockMovement {
                    movement_id: StockMovementId::from(get::<Uuid>(row, "movement_id")?),
                    tenant_id,
                    item_id: ItemId::from(get::<Uuid>(row, "item_id")?),
                    delta: get(row, "delta")?,
                    source: MovementSource {
                        order_id: AggregateId::from_uuid(get(row, "order_id")?),
                        line_id: AggregateId::from_uuid(get(row, "line_id")?),
                    },
                    reason: reason
                        .parse::<MovementReason>()
                        .map_err(|e| StoreError::Storage(e.to_string()))?,
                    recorded_at: get(row, "recorded_at")?,
                })
            })
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Storage(format!("failed to decode column {column}: {e}")))
}

fn order_from_row(row: &PgRow) -> Result<PurchaseOrder, StoreError> {
    let order_number: String = get(row, "order_number")?;
    let status: String = get(row, "status")?;
    let version: i64 = get(row, "version")?;
    let materials_request_id: Option<Uuid> = get(row, "materials_request_id")?;
    let invoice_date: Option<NaiveDate> = get(row, "invoice_date")?;
    let ordered_at: Option<DateTime<Utc>> = get(row, "ordered_at")?;

    Ok(PurchaseOrder {
        order_id: PurchaseOrderId::from(get::<Uuid>(row, "order_id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        order_number: OrderNumber::parse(&order_number).map_err(|e| StoreError::Storage(e.to_string()))?,
        status: status
            .parse::<PurchaseOrderStatus>()
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        notes: get(row, "notes")?,
        total_amount: get(row, "total_amount")?,
        delivery_charge: get(row, "delivery_charge")?,
        ordered_at,
        invoice_date,
        invoice_ref: get(row, "invoice_ref")?,
        materials_request_id: materials_request_id.map(AggregateId::from_uuid),
        version: version as u64,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<PurchaseOrderLine, StoreError> {
    Ok(PurchaseOrderLine {
        line_id: LineId::from(get::<Uuid>(row, "line_id")?),
        order_id: PurchaseOrderId::from(get::<Uuid>(row, "order_id")?),
        item_id: ItemId::from(get::<Uuid>(row, "item_id")?),
        quantity_ordered: get(row, "quantity_ordered")?,
        quantity_received: get(row, "quantity_received")?,
        unit_price: get(row, "unit_price")?,
        notes: get(row, "notes")?,
    })
}

/// Whole milliseconds, at least 1: Postgres reads `lock_timeout = 0` as "wait forever".
fn lock_timeout_ms(timeout: Duration) -> u128 {
    timeout.as_millis().max(1)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("55P03") | Some("57014") => StoreError::Timeout(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("no database connection available in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

//! Purchase Order Store: the tenant-scoped persistence boundary.
//!
//! All writes of one lifecycle operation go through a single [`UnitOfWork`]
//! obtained from [`PurchaseOrderStore::begin`]. A unit of work is bound to one
//! tenant at creation; every read and write it performs is filtered by that
//! tenant, so a foreign order or item is indistinguishable from a missing one.
//!
//! ## Guarantees
//!
//! - **Atomicity**: nothing written through a unit of work is visible to other
//!   readers until [`UnitOfWork::commit`]; dropping it or calling
//!   [`UnitOfWork::rollback`] discards every write.
//! - **Additive stock**: [`UnitOfWork::increment_stock`] applies a signed delta
//!   at the storage layer. There is no absolute "set quantity" operation.
//! - **Line uniqueness**: at most one line per (order, item), checked at commit
//!   so that a batch may move items between lines.
//! - **Optimistic checks**: [`UnitOfWork::update_order`] honours an
//!   [`ExpectedVersion`] and reports a mismatch as [`StoreError::Conflict`].
//!
//! ## Implementations
//!
//! - [`InMemoryPurchaseOrderStore`]: tests/dev; transactions serialize on an
//!   async mutex and work on a private copy of the state.
//! - [`PostgresPurchaseOrderStore`]: sqlx transactions with row locks on the
//!   order and `quantity = quantity + $delta` increments.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use forgeproc_core::{ExpectedVersion, TenantId};
use forgeproc_inventory::{Item, ItemId, StockMovement};
use forgeproc_purchasing::{LineId, PurchaseOrder, PurchaseOrderId, PurchaseOrderLine};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{FailPoint, InMemoryPurchaseOrderStore};
pub use postgres::PostgresPurchaseOrderStore;

/// Store operation error.
///
/// Infrastructure errors, as opposed to domain errors: callers never see a
/// partially applied unit of work when one of these is returned from `commit`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The row does not exist for this tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness, optimistic version or serialization conflict. Retry the whole operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A transaction could not be acquired in time. Nothing was written.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Any other storage failure (connection, constraint, corrupt row).
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Factory for tenant-scoped units of work.
#[async_trait]
pub trait PurchaseOrderStore: Send + Sync {
    /// Start a unit of work for `tenant_id`.
    ///
    /// May wait for other transactions; callers bound the wait with a timeout.
    async fn begin(&self, tenant_id: TenantId) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

#[async_trait]
impl<S> PurchaseOrderStore for Arc<S>
where
    S: PurchaseOrderStore + ?Sized,
{
    async fn begin(&self, tenant_id: TenantId) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin(tenant_id).await
    }
}

/// One transaction against the store, bound to a single tenant.
#[async_trait]
pub trait UnitOfWork: Send {
    fn tenant_id(&self) -> TenantId;

    /// Load an order header, locking it for the rest of the unit of work.
    async fn load_order(&mut self, order_id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError>;

    /// All of the tenant's orders, newest first.
    async fn list_orders(&mut self) -> Result<Vec<PurchaseOrder>, StoreError>;

    /// Lines of an order in insertion order.
    async fn load_lines(&mut self, order_id: PurchaseOrderId) -> Result<Vec<PurchaseOrderLine>, StoreError>;

    /// The subset of `item_ids` that exist for this tenant.
    async fn owned_items(&mut self, item_ids: &[ItemId]) -> Result<HashSet<ItemId>, StoreError>;

    async fn load_item(&mut self, item_id: ItemId) -> Result<Option<Item>, StoreError>;

    /// Insert a new order. Returns the stored version.
    ///
    /// A duplicate order number for the tenant is a [`StoreError::Conflict`].
    async fn insert_order(&mut self, order: &PurchaseOrder) -> Result<u64, StoreError>;

    /// Overwrite an order header and bump its version. Returns the new version.
    async fn update_order(
        &mut self,
        order: &PurchaseOrder,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError>;

    /// Delete an order and all of its lines.
    async fn delete_order(&mut self, order_id: PurchaseOrderId) -> Result<(), StoreError>;

    async fn insert_line(&mut self, line: &PurchaseOrderLine) -> Result<(), StoreError>;

    async fn update_line(&mut self, line: &PurchaseOrderLine) -> Result<(), StoreError>;

    async fn delete_line(&mut self, order_id: PurchaseOrderId, line_id: LineId) -> Result<(), StoreError>;

    /// Add `delta` to the item's stock counter. Returns the new quantity.
    async fn increment_stock(&mut self, item_id: ItemId, delta: i64) -> Result<i64, StoreError>;

    /// Append a stock movement to the ledger.
    async fn record_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;

    /// Ledger entries for an item, oldest first.
    async fn item_movements(&mut self, item_id: ItemId) -> Result<Vec<StockMovement>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

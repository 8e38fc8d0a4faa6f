use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use forgeproc_core::{ExpectedVersion, TenantId};
use forgeproc_inventory::{Item, ItemId, StockMovement};
use forgeproc_purchasing::{LineId, PurchaseOrder, PurchaseOrderId, PurchaseOrderLine};

use super::{PurchaseOrderStore, StoreError, UnitOfWork};

/// A write the in-memory store can be told to fail, to exercise rollback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    IncrementStock,
    RecordMovement,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct State {
    orders: HashMap<(TenantId, PurchaseOrderId), PurchaseOrder>,
    lines: HashMap<PurchaseOrderId, Vec<PurchaseOrderLine>>,
    items: HashMap<(TenantId, ItemId), Item>,
    movements: Vec<StockMovement>,
}

/// In-memory purchase order store.
///
/// Intended for tests/dev. Units of work serialize on one async mutex, so
/// `begin` waits while another unit of work is open.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPurchaseOrderStore {
    state: Arc<AsyncMutex<State>>,
    fail_on: Arc<Mutex<Option<FailPoint>>>,
}

impl InMemoryPurchaseOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an item owned by the item's tenant.
    pub async fn put_item(&self, item: Item) {
        let mut state = self.state.lock().await;
        state.items.insert((item.tenant_id, item.item_id), item);
    }

    /// Current stock of an item, if it exists for the tenant.
    pub async fn stock(&self, tenant_id: TenantId, item_id: ItemId) -> Option<i64> {
        let state = self.state.lock().await;
        state.items.get(&(tenant_id, item_id)).map(|i| i.quantity)
    }

    /// Make units of work started from now on fail at `point` (`None` restores).
    pub fn fail_on(&self, point: Option<FailPoint>) {
        if let Ok(mut f) = self.fail_on.lock() {
            *f = point;
        }
    }

    fn current_fail_point(&self) -> Option<FailPoint> {
        self.fail_on.lock().ok().and_then(|f| *f)
    }
}

#[async_trait]
impl PurchaseOrderStore for InMemoryPurchaseOrderStore {
    async fn begin(&self, tenant_id: TenantId) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            tenant_id,
            guard,
            working,
            fail_on: self.current_fail_point(),
        }))
    }
}

/// Unit of work over a private copy of the state; commit swaps it in.
pub struct InMemoryUnitOfWork {
    tenant_id: TenantId,
    guard: OwnedMutexGuard<State>,
    working: State,
    fail_on: Option<FailPoint>,
}

impl InMemoryUnitOfWork {
    fn injected(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.fail_on == Some(point) {
            return Err(StoreError::Storage(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn owns_order(&self, order_id: PurchaseOrderId) -> bool {
        self.working.orders.contains_key(&(self.tenant_id, order_id))
    }

    fn lines_mut(&mut self, order_id: PurchaseOrderId) -> Result<&mut Vec<PurchaseOrderLine>, StoreError> {
        if !self.owns_order(order_id) {
            return Err(StoreError::NotFound(format!("purchase order {order_id}")));
        }
        Ok(self.working.lines.entry(order_id).or_default())
    }

    /// At most one line per (order, item), checked for every order this tenant owns.
    fn check_line_uniqueness(&self) -> Result<(), StoreError> {
        for (tenant_id, order_id) in self.working.orders.keys() {
            if *tenant_id != self.tenant_id {
                continue;
            }
            let mut seen = HashSet::new();
            for line in self.working.lines.get(order_id).into_iter().flatten() {
                if !seen.insert(line.item_id) {
                    return Err(StoreError::Conflict(format!(
                        "order {order_id} has more than one line for item {}",
                        line.item_id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    async fn load_order(&mut self, order_id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        Ok(self.working.orders.get(&(self.tenant_id, order_id)).cloned())
    }

    async fn list_orders(&mut self) -> Result<Vec<PurchaseOrder>, StoreError> {
        let mut orders: Vec<PurchaseOrder> = self
            .working
            .orders
            .iter()
            .filter(|((tenant_id, _), _)| *tenant_id == self.tenant_id)
            .map(|(_, o)| o.clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.order_id.cmp(&a.order_id)));
        Ok(orders)
    }

    async fn load_lines(&mut self, order_id: PurchaseOrderId) -> Result<Vec<PurchaseOrderLine>, StoreError> {
        if !self.owns_order(order_id) {
            return Ok(Vec::new());
        }
        Ok(self.working.lines.get(&order_id).cloned().unwrap_or_default())
    }

    async fn owned_items(&mut self, item_ids: &[ItemId]) -> Result<HashSet<ItemId>, StoreError> {
        Ok(item_ids
            .iter()
            .filter(|id| self.working.items.contains_key(&(self.tenant_id, **id)))
            .copied()
            .collect())
    }

    async fn load_item(&mut self, item_id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.working.items.get(&(self.tenant_id, item_id)).cloned())
    }

    async fn insert_order(&mut self, order: &PurchaseOrder) -> Result<u64, StoreError> {
        if order.tenant_id != self.tenant_id {
            return Err(StoreError::Storage("order tenant does not match unit of work".to_string()));
        }
        let key = (self.tenant_id, order.order_id);
        if self.working.orders.contains_key(&key) {
            return Err(StoreError::Conflict(format!("purchase order {} already exists", order.order_id)));
        }
        let duplicate_number = self
            .working
            .orders
            .iter()
            .any(|((t, _), o)| *t == self.tenant_id && o.order_number == order.order_number);
        if duplicate_number {
            return Err(StoreError::Conflict(format!(
                "order number '{}' is already in use",
                order.order_number
            )));
        }

        let mut stored = order.clone();
        stored.version = 1;
        self.working.orders.insert(key, stored);
        Ok(1)
    }

    async fn update_order(
        &mut self,
        order: &PurchaseOrder,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError> {
        let key = (self.tenant_id, order.order_id);
        let current = self
            .working
            .orders
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("purchase order {}", order.order_id)))?;
        expected
            .check(current.version)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        let version = current.version + 1;
        *current = PurchaseOrder {
            version,
            ..order.clone()
        };
        Ok(version)
    }

    async fn delete_order(&mut self, order_id: PurchaseOrderId) -> Result<(), StoreError> {
        if self.working.orders.remove(&(self.tenant_id, order_id)).is_none() {
            return Err(StoreError::NotFound(format!("purchase order {order_id}")));
        }
        self.working.lines.remove(&order_id);
        Ok(())
    }

    async fn insert_line(&mut self, line: &PurchaseOrderLine) -> Result<(), StoreError> {
        let lines = self.lines_mut(line.order_id)?;
        if lines.iter().any(|l| l.line_id == line.line_id) {
            return Err(StoreError::Conflict(format!("line {} already exists", line.line_id)));
        }
        lines.push(line.clone());
        Ok(())
    }

    async fn update_line(&mut self, line: &PurchaseOrderLine) -> Result<(), StoreError> {
        let lines = self.lines_mut(line.order_id)?;
        let current = lines
            .iter_mut()
            .find(|l| l.line_id == line.line_id)
            .ok_or_else(|| StoreError::NotFound(format!("line {}", line.line_id)))?;
        *current = line.clone();
        Ok(())
    }

    async fn delete_line(&mut self, order_id: PurchaseOrderId, line_id: LineId) -> Result<(), StoreError> {
        let lines = self.lines_mut(order_id)?;
        let before = lines.len();
        lines.retain(|l| l.line_id != line_id);
        if lines.len() == before {
            return Err(StoreError::NotFound(format!("line {line_id}")));
        }
        Ok(())
    }

    async fn increment_stock(&mut self, item_id: ItemId, delta: i64) -> Result<i64, StoreError> {
        self.injected(FailPoint::IncrementStock)?;
        let item = self
            .working
            .items
            .get_mut(&(self.tenant_id, item_id))
            .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))?;
        item.quantity = item
            .quantity_after(delta)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(item.quantity)
    }

    async fn record_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.injected(FailPoint::RecordMovement)?;
        if movement.tenant_id != self.tenant_id {
            return Err(StoreError::Storage("movement tenant does not match unit of work".to_string()));
        }
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn item_movements(&mut self, item_id: ItemId) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .working
            .movements
            .iter()
            .filter(|m| m.tenant_id == self.tenant_id && m.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.injected(FailPoint::Commit)?;
        self.check_line_uniqueness()?;
        let InMemoryUnitOfWork { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

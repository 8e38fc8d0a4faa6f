use serde::{Deserialize, Serialize};

use forgeproc_core::{DomainError, DomainResult, TenantId, typed_id};

typed_id!(
    /// Inventory item identifier (tenant-scoped via the owning `tenant_id`).
    ItemId
);

/// Stock view of an inventory item.
///
/// Other attributes (pricing, category, ...) belong to the catalogue subsystem
/// and are deliberately absent here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub tenant_id: TenantId,
    pub name: String,
    pub quantity: i64,
}

impl Item {
    pub fn new(tenant_id: TenantId, item_id: ItemId, name: impl Into<String>, quantity: i64) -> Self {
        Self {
            item_id,
            tenant_id,
            name: name.into(),
            quantity,
        }
    }

    /// Quantity after adding `delta`.
    ///
    /// Stock may legitimately go negative here: other subsystems consume stock
    /// independently and this counter only composes deltas.
    pub fn quantity_after(&self, delta: i64) -> DomainResult<i64> {
        self.quantity.checked_add(delta).ok_or_else(|| {
            DomainError::invariant(format!(
                "stock overflow for item {} ({} + {delta})",
                self.item_id, self.quantity
            ))
        })
    }
}

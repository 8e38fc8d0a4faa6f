//! Purchase order events emitted to the audit sink after each committed change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeproc_core::TenantId;
use forgeproc_events::{Event, EventEnvelope};

use crate::order::{LineId, OrderNumber, PurchaseOrderId};
use crate::status::PurchaseOrderStatus;

pub const AGGREGATE_TYPE: &str = "purchasing.order";

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub order_number: OrderNumber,
    pub line_count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesReconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesReconciled {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptRecorded.
///
/// Carries the applied per-line deltas; rejected and skipped entries are not
/// part of the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecorded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub deltas: Vec<(LineId, i64)>,
    pub status: PurchaseOrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FieldsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldsUpdated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub fields: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusForced (manual override that bypasses derivation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusForced {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub from: PurchaseOrderStatus,
    pub to: PurchaseOrderStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub previous: PurchaseOrderStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub order_number: OrderNumber,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    LinesReconciled(LinesReconciled),
    ReceiptRecorded(ReceiptRecorded),
    FieldsUpdated(FieldsUpdated),
    StatusForced(StatusForced),
    OrderCancelled(OrderCancelled),
    OrderDeleted(OrderDeleted),
}

impl PurchaseOrderEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.tenant_id,
            PurchaseOrderEvent::LinesReconciled(e) => e.tenant_id,
            PurchaseOrderEvent::ReceiptRecorded(e) => e.tenant_id,
            PurchaseOrderEvent::FieldsUpdated(e) => e.tenant_id,
            PurchaseOrderEvent::StatusForced(e) => e.tenant_id,
            PurchaseOrderEvent::OrderCancelled(e) => e.tenant_id,
            PurchaseOrderEvent::OrderDeleted(e) => e.tenant_id,
        }
    }

    pub fn order_id(&self) -> PurchaseOrderId {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.order_id,
            PurchaseOrderEvent::LinesReconciled(e) => e.order_id,
            PurchaseOrderEvent::ReceiptRecorded(e) => e.order_id,
            PurchaseOrderEvent::FieldsUpdated(e) => e.order_id,
            PurchaseOrderEvent::StatusForced(e) => e.order_id,
            PurchaseOrderEvent::OrderCancelled(e) => e.order_id,
            PurchaseOrderEvent::OrderDeleted(e) => e.order_id,
        }
    }

    /// Wrap into the envelope handed to the audit sink.
    pub fn into_envelope(self) -> EventEnvelope<PurchaseOrderEvent> {
        let tenant_id = self.tenant_id();
        let order_id = self.order_id();
        EventEnvelope::wrap(tenant_id, order_id.0, AGGREGATE_TYPE, self)
    }
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::LinesReconciled(_) => "purchasing.order.lines_reconciled",
            PurchaseOrderEvent::ReceiptRecorded(_) => "purchasing.order.receipt_recorded",
            PurchaseOrderEvent::FieldsUpdated(_) => "purchasing.order.fields_updated",
            PurchaseOrderEvent::StatusForced(_) => "purchasing.order.status_forced",
            PurchaseOrderEvent::OrderCancelled(_) => "purchasing.order.cancelled",
            PurchaseOrderEvent::OrderDeleted(_) => "purchasing.order.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::LinesReconciled(e) => e.occurred_at,
            PurchaseOrderEvent::ReceiptRecorded(e) => e.occurred_at,
            PurchaseOrderEvent::FieldsUpdated(e) => e.occurred_at,
            PurchaseOrderEvent::StatusForced(e) => e.occurred_at,
            PurchaseOrderEvent::OrderCancelled(e) => e.occurred_at,
            PurchaseOrderEvent::OrderDeleted(e) => e.occurred_at,
        }
    }

    fn summary(&self) -> String {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => format!(
                "Created purchase order {} with {} line(s)",
                e.order_number, e.line_count
            ),
            PurchaseOrderEvent::LinesReconciled(e) => format!(
                "Updated lines: {} added, {} changed, {} removed",
                e.created, e.updated, e.deleted
            ),
            PurchaseOrderEvent::ReceiptRecorded(e) => {
                let units: i64 = e.deltas.iter().map(|(_, d)| d).sum();
                format!(
                    "Recorded receipt on {} line(s) ({units:+} units), status {}",
                    e.deltas.len(),
                    e.status
                )
            }
            PurchaseOrderEvent::FieldsUpdated(e) => {
                format!("Updated {}", e.fields.join(", "))
            }
            PurchaseOrderEvent::StatusForced(e) => match &e.reason {
                Some(reason) => format!("Status forced from {} to {} ({reason})", e.from, e.to),
                None => format!("Status forced from {} to {}", e.from, e.to),
            },
            PurchaseOrderEvent::OrderCancelled(e) => match &e.reason {
                Some(reason) => format!("Cancelled (was {}): {reason}", e.previous),
                None => format!("Cancelled (was {})", e.previous),
            },
            PurchaseOrderEvent::OrderDeleted(e) => {
                format!("Deleted purchase order {}", e.order_number)
            }
        }
    }
}

//! Purchasing domain module (purchase orders, line reconciliation, receipts).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Infrastructure turns
//! the plans produced here into writes inside one unit of work.

pub mod events;
pub mod order;
pub mod receipt;
pub mod reconcile;
pub mod status;

pub use events::{
    FieldsUpdated, LinesReconciled, OrderCancelled, OrderDeleted, PurchaseOrderCreated,
    PurchaseOrderEvent, ReceiptRecorded, StatusForced,
};
pub use order::{
    LineId, OrderFieldsPatch, OrderNumber, OrderWithLines, PurchaseOrder, PurchaseOrderId,
    PurchaseOrderLine,
};
pub use receipt::{
    ReceiptApplication, ReceiptDelta, ReceiptLine, ReceiptPlan, ReceiptRejection, RejectedReceipt,
    plan_receipts,
};
pub use reconcile::{LineIntent, LineSpec, MAX_QUANTITY, RawQuantity, ReconcilePlan, reconcile};
pub use status::{PurchaseOrderStatus, derive_status};

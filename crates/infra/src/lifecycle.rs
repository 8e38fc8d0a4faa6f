//! Order lifecycle orchestration (application-level service).
//!
//! ## Operation Flow
//!
//! ```text
//! request
//!   ↓
//! 1. Begin a tenant-scoped unit of work (bounded by `tx_timeout`)
//!   ↓
//! 2. Load the order (locked) and its lines
//!   ↓
//! 3. Plan: Line Reconciler and/or Receipt Processor (pure)
//!   ↓
//! 4. Derive status (receipts only)
//!   ↓
//! 5. Write every effect through the unit of work, then commit
//!   ↓
//! 6. Publish an audit event (failure becomes a warning on the outcome)
//! ```
//!
//! Any error before commit drops the unit of work, which discards its writes.
//! Nothing is published for an operation that did not commit or that turned
//! out to be a no-op.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use forgeproc_core::{DomainError, ExpectedVersion, TenantId};
use forgeproc_events::{AuditSink, Event, EventEnvelope};
use forgeproc_inventory::{Item, ItemId, MovementSource, StockMovement};
use forgeproc_purchasing::{
    FieldsUpdated, LineId, LineIntent, LineSpec, LinesReconciled, OrderCancelled, OrderDeleted,
    OrderFieldsPatch, OrderNumber, OrderWithLines, PurchaseOrder, PurchaseOrderCreated,
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus, ReceiptApplication, ReceiptLine,
    ReceiptRecorded, ReconcilePlan, RejectedReceipt, StatusForced, derive_status, plan_receipts,
    reconcile,
};

use crate::store::{PurchaseOrderStore, StoreError, UnitOfWork};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The order (or a referenced line/item) does not exist for this tenant.
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed or out-of-range input; nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Concurrent modification detected; retry the whole operation.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Transaction could not be acquired or committed; nothing was written.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for LifecycleError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => LifecycleError::NotFound(msg),
            StoreError::Conflict(msg) => LifecycleError::Conflict(msg),
            StoreError::Timeout(msg) => LifecycleError::Storage(format!("timed out: {msg}")),
            StoreError::Storage(msg) => LifecycleError::Storage(msg),
        }
    }
}

impl From<DomainError> for LifecycleError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LifecycleError::Validation(msg),
            DomainError::InvalidId(msg) => LifecycleError::Validation(msg),
            DomainError::InvariantViolation(msg) => LifecycleError::Validation(msg),
            DomainError::NotFound(msg) => LifecycleError::NotFound(msg),
            DomainError::Conflict(msg) => LifecycleError::Conflict(msg),
        }
    }
}

/// Non-fatal condition attached to a committed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationWarning {
    /// The change committed but its audit event could not be recorded.
    AuditSinkFailed { event_type: String, message: String },
}

/// Result of a lifecycle operation plus any warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<OperationWarning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, warnings: Vec<OperationWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn clean(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// What happened to each entry of a receipt batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptReport {
    pub order: OrderWithLines,
    pub applied: Vec<ReceiptApplication>,
    pub skipped: Vec<LineId>,
    pub rejected: Vec<RejectedReceipt>,
}

/// An item's current stock together with the movements recorded against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLedger {
    pub item: Item,
    pub movements: Vec<StockMovement>,
}

/// Order Lifecycle Service.
///
/// Composes a [`PurchaseOrderStore`] and an [`AuditSink`]; it contains no IO
/// itself. Every public operation is tenant-scoped: an order owned by another
/// tenant is reported exactly like a missing one.
#[derive(Debug)]
pub struct OrderLifecycleService<S, A> {
    store: S,
    audit: A,
    tx_timeout: Duration,
}

impl<S, A> OrderLifecycleService<S, A> {
    pub fn new(store: S, audit: A, tx_timeout: Duration) -> Self {
        Self {
            store,
            audit,
            tx_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tx_timeout(&self) -> Duration {
        self.tx_timeout
    }
}

impl<S, A> OrderLifecycleService<S, A>
where
    S: PurchaseOrderStore,
    A: AuditSink<EventEnvelope<PurchaseOrderEvent>>,
{
    /// Create a DRAFT order with the given lines.
    #[instrument(skip(self, lines), fields(tenant_id = %tenant_id.as_uuid(), line_count = lines.len()), err)]
    pub async fn create(
        &self,
        tenant_id: TenantId,
        order_number: &str,
        lines: &[LineSpec],
    ) -> Result<Outcome<OrderWithLines>, LifecycleError> {
        let order_number = OrderNumber::parse(order_number)?;
        let mut uow = self.begin(tenant_id).await?;

        let now = Utc::now();
        let mut order = PurchaseOrder::draft(tenant_id, PurchaseOrderId::generate(), order_number, now);
        let owned = uow.owned_items(&item_ids(lines)).await?;
        let plan = reconcile(order.order_id, &[], lines, &owned)?;

        order.version = uow.insert_order(&order).await?;
        write_line_plan(&mut *uow, order.order_id, &plan).await?;
        uow.commit().await?;

        let lines = plan.apply_to(&[]);
        tracing::info!(order_id = %order.order_id, lines = lines.len(), "purchase order created");

        let warnings = self.publish(PurchaseOrderEvent::PurchaseOrderCreated(PurchaseOrderCreated {
            tenant_id,
            order_id: order.order_id,
            order_number: order.order_number.clone(),
            line_count: lines.len(),
            occurred_at: now,
        }));
        Ok(Outcome::new(OrderWithLines { order, lines }, warnings))
    }

    /// Replace the order's lines with `lines`, preserving received quantities.
    ///
    /// Status is not re-derived: editing lines does not by itself change delivery progress.
    #[instrument(skip(self, lines), fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id, line_count = lines.len()), err)]
    pub async fn update_lines(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        lines: &[LineSpec],
    ) -> Result<Outcome<OrderWithLines>, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let mut order = load_order(&mut *uow, order_id).await?;
        let existing = uow.load_lines(order_id).await?;
        let owned = uow.owned_items(&item_ids(lines)).await?;

        let plan = reconcile(order_id, &existing, lines, &owned)?;
        if plan.is_noop() {
            uow.rollback().await?;
            return Ok(Outcome::clean(OrderWithLines { order, lines: existing }));
        }

        let now = Utc::now();
        write_line_plan(&mut *uow, order_id, &plan).await?;
        order.updated_at = now;
        order.version = uow.update_order(&order, ExpectedVersion::of(&order)).await?;
        uow.commit().await?;

        let (created, updated, deleted) = plan.counts();
        tracing::info!(%order_id, created, updated, deleted, unchanged = plan.unchanged, "lines reconciled");

        let lines = plan.apply_to(&existing);
        let warnings = self.publish(PurchaseOrderEvent::LinesReconciled(LinesReconciled {
            tenant_id,
            order_id,
            created,
            updated,
            deleted,
            occurred_at: now,
        }));
        Ok(Outcome::new(OrderWithLines { order, lines }, warnings))
    }

    /// Apply a batch of deliveries, increment stock by each delta and re-derive status.
    ///
    /// Out-of-range entries are reported in the [`ReceiptReport`] and skipped; a
    /// line that is not on the order fails the whole batch.
    #[instrument(skip(self, receipts), fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id, receipt_count = receipts.len()), err)]
    pub async fn record_receipt(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        receipts: &[ReceiptLine],
    ) -> Result<Outcome<ReceiptReport>, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let mut order = load_order(&mut *uow, order_id).await?;
        let mut lines = uow.load_lines(order_id).await?;

        let plan = plan_receipts(&lines, receipts)?;
        for rejected in &plan.rejected {
            tracing::debug!(line_id = %rejected.line_id, reason = %rejected.rejection, "receipt entry rejected");
        }

        if plan.is_noop() {
            uow.rollback().await?;
            return Ok(Outcome::clean(ReceiptReport {
                order: OrderWithLines { order, lines },
                applied: Vec::new(),
                skipped: plan.skipped,
                rejected: plan.rejected,
            }));
        }

        let now = Utc::now();
        plan.apply_to(&mut lines);

        let mut written: HashSet<LineId> = HashSet::new();
        for application in &plan.applications {
            if written.insert(application.line_id) {
                if let Some(line) = lines.iter().find(|l| l.line_id == application.line_id) {
                    uow.update_line(line).await?;
                }
            }
        }
        for application in plan.stock_write_order() {
            uow.increment_stock(application.item_id, application.delta).await?;
            uow.record_movement(&StockMovement::new(
                tenant_id,
                application.item_id,
                application.delta,
                MovementSource {
                    order_id: order_id.0,
                    line_id: application.line_id.0,
                },
                now,
            ))
            .await?;
        }

        order.status = derive_status(order.status, &lines);
        order.updated_at = now;
        order.version = uow.update_order(&order, ExpectedVersion::of(&order)).await?;
        uow.commit().await?;

        tracing::info!(
            %order_id,
            applied = plan.applications.len(),
            skipped = plan.skipped.len(),
            rejected = plan.rejected.len(),
            status = %order.status,
            "receipt recorded"
        );

        let warnings = self.publish(PurchaseOrderEvent::ReceiptRecorded(ReceiptRecorded {
            tenant_id,
            order_id,
            deltas: plan.applications.iter().map(|a| (a.line_id, a.delta)).collect(),
            status: order.status,
            occurred_at: now,
        }));

        Ok(Outcome::new(
            ReceiptReport {
                order: OrderWithLines { order, lines },
                applied: plan.applications,
                skipped: plan.skipped,
                rejected: plan.rejected,
            },
            warnings,
        ))
    }

    /// Update non-line attributes.
    ///
    /// A `status` in the patch is a manual override: it bypasses derivation and
    /// is audited as a forced status change.
    #[instrument(skip(self, patch), fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id), err)]
    pub async fn update_fields(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        patch: &OrderFieldsPatch,
    ) -> Result<Outcome<OrderWithLines>, LifecycleError> {
        patch.validate()?;
        let forced = patch.requested_status()?;

        let mut uow = self.begin(tenant_id).await?;
        let mut order = load_order(&mut *uow, order_id).await?;
        let lines = uow.load_lines(order_id).await?;

        let now = Utc::now();
        let changed = order.apply_fields(patch, now)?;
        let previous = order.status;
        if let Some(status) = forced {
            order.force_status(status, now);
        }
        let status_changed = order.status != previous;

        if changed.is_empty() && !status_changed {
            uow.rollback().await?;
            return Ok(Outcome::clean(OrderWithLines { order, lines }));
        }

        order.version = uow.update_order(&order, ExpectedVersion::of(&order)).await?;
        uow.commit().await?;

        let mut warnings = Vec::new();
        if !changed.is_empty() {
            tracing::info!(%order_id, fields = ?changed, "order fields updated");
            warnings.extend(self.publish(PurchaseOrderEvent::FieldsUpdated(FieldsUpdated {
                tenant_id,
                order_id,
                fields: changed.iter().map(|f| f.to_string()).collect(),
                occurred_at: now,
            })));
        }
        if status_changed {
            tracing::warn!(%order_id, from = %previous, to = %order.status, "status forced via field update");
            warnings.extend(self.publish(PurchaseOrderEvent::StatusForced(StatusForced {
                tenant_id,
                order_id,
                from: previous,
                to: order.status,
                reason: None,
                occurred_at: now,
            })));
        }

        Ok(Outcome::new(OrderWithLines { order, lines }, warnings))
    }

    /// Explicit, audited status override that bypasses derivation.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id, status = %status), err)]
    pub async fn force_status(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        status: PurchaseOrderStatus,
        reason: Option<String>,
    ) -> Result<Outcome<OrderWithLines>, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let mut order = load_order(&mut *uow, order_id).await?;
        let lines = uow.load_lines(order_id).await?;

        let now = Utc::now();
        let previous = order.force_status(status, now);
        if previous == status {
            uow.rollback().await?;
            return Ok(Outcome::clean(OrderWithLines { order, lines }));
        }

        order.version = uow.update_order(&order, ExpectedVersion::of(&order)).await?;
        uow.commit().await?;

        tracing::warn!(%order_id, from = %previous, to = %status, "status forced");
        let warnings = self.publish(PurchaseOrderEvent::StatusForced(StatusForced {
            tenant_id,
            order_id,
            from: previous,
            to: status,
            reason,
            occurred_at: now,
        }));
        Ok(Outcome::new(OrderWithLines { order, lines }, warnings))
    }

    /// Move the order to CANCELLED from any state. Cancelling twice is a no-op.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id), err)]
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        reason: Option<String>,
    ) -> Result<Outcome<OrderWithLines>, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let mut order = load_order(&mut *uow, order_id).await?;
        let lines = uow.load_lines(order_id).await?;

        if order.status.is_cancelled() {
            uow.rollback().await?;
            return Ok(Outcome::clean(OrderWithLines { order, lines }));
        }

        let now = Utc::now();
        let previous = order.force_status(PurchaseOrderStatus::Cancelled, now);
        order.version = uow.update_order(&order, ExpectedVersion::of(&order)).await?;
        uow.commit().await?;

        tracing::info!(%order_id, from = %previous, "purchase order cancelled");
        let warnings = self.publish(PurchaseOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id,
            order_id,
            previous,
            reason,
            occurred_at: now,
        }));
        Ok(Outcome::new(OrderWithLines { order, lines }, warnings))
    }

    /// Remove the order and its lines. Stock movements already recorded stay in the ledger.
    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id), err)]
    pub async fn delete(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<Outcome<()>, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let order = load_order(&mut *uow, order_id).await?;
        uow.delete_order(order_id).await?;
        uow.commit().await?;

        tracing::info!(%order_id, "purchase order deleted");
        let warnings = self.publish(PurchaseOrderEvent::OrderDeleted(OrderDeleted {
            tenant_id,
            order_id,
            order_number: order.order_number,
            occurred_at: Utc::now(),
        }));
        Ok(Outcome::new((), warnings))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id), err)]
    pub async fn get(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<OrderWithLines, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let order = load_order(&mut *uow, order_id).await?;
        let lines = uow.load_lines(order_id).await?;
        uow.rollback().await?;
        Ok(OrderWithLines { order, lines })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<PurchaseOrder>, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let orders = uow.list_orders().await?;
        uow.rollback().await?;
        Ok(orders)
    }

    /// Current stock of an item and the movements that produced it.
    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid(), item_id = %item_id), err)]
    pub async fn stock_ledger(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<StockLedger, LifecycleError> {
        let mut uow = self.begin(tenant_id).await?;
        let item = uow
            .load_item(item_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("item {item_id}")))?;
        let movements = uow.item_movements(item_id).await?;
        uow.rollback().await?;
        Ok(StockLedger { item, movements })
    }

    async fn begin(&self, tenant_id: TenantId) -> Result<Box<dyn UnitOfWork>, LifecycleError> {
        match tokio::time::timeout(self.tx_timeout, self.store.begin(tenant_id)).await {
            Ok(uow) => Ok(uow?),
            Err(_) => {
                tracing::warn!(timeout = ?self.tx_timeout, "unit of work not acquired in time");
                Err(StoreError::Timeout(format!(
                    "could not begin a unit of work within {:?}",
                    self.tx_timeout
                ))
                .into())
            }
        }
    }

    fn publish(&self, event: PurchaseOrderEvent) -> Vec<OperationWarning> {
        let event_type = event.event_type();
        match self.audit.publish(event.into_envelope()) {
            Ok(()) => Vec::new(),
            Err(e) => {
                tracing::warn!(event_type, error = %e, "audit sink failed; change is committed");
                vec![OperationWarning::AuditSinkFailed {
                    event_type: event_type.to_string(),
                    message: e.to_string(),
                }]
            }
        }
    }
}

async fn load_order(uow: &mut dyn UnitOfWork, order_id: PurchaseOrderId) -> Result<PurchaseOrder, LifecycleError> {
    uow.load_order(order_id)
        .await?
        .ok_or_else(|| LifecycleError::NotFound(format!("purchase order {order_id}")))
}

async fn write_line_plan(
    uow: &mut dyn UnitOfWork,
    order_id: PurchaseOrderId,
    plan: &ReconcilePlan,
) -> Result<(), StoreError> {
    for intent in plan.ordered_for_write() {
        match intent {
            LineIntent::Delete(line_id) => uow.delete_line(order_id, *line_id).await?,
            LineIntent::Update(line) => uow.update_line(line).await?,
            LineIntent::Create(line) => uow.insert_line(line).await?,
        }
    }
    Ok(())
}

fn item_ids(lines: &[LineSpec]) -> Vec<ItemId> {
    lines.iter().map(|l| l.item_id).collect()
}

//! Receipt planning: resolve delivered quantities into per-line stock deltas.
//!
//! Planning is two-phase. [`plan_receipts`] validates the whole batch against a
//! working copy of the order's lines and produces a [`ReceiptPlan`]; nothing is
//! applied until the caller writes every accepted application inside one unit
//! of work.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use forgeproc_core::{DomainError, DomainResult};
use forgeproc_inventory::ItemId;

use crate::order::{LineId, PurchaseOrderLine};
use crate::reconcile::MAX_QUANTITY;

/// How a caller expressed a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiptDelta {
    /// The new cumulative received total for the line.
    Absolute { total: f64 },
    /// Units delivered since the last receipt.
    Incremental { delivered: f64 },
}

impl ReceiptDelta {
    /// Signed delta against `current_received`, floored to whole units.
    pub fn resolve(&self, current_received: i64) -> Result<i64, ReceiptRejection> {
        match *self {
            ReceiptDelta::Absolute { total } => whole_units(total)?
                .checked_sub(current_received)
                .ok_or(ReceiptRejection::OutOfRange),
            ReceiptDelta::Incremental { delivered } => whole_units(delivered),
        }
    }
}

fn whole_units(value: f64) -> Result<i64, ReceiptRejection> {
    if !value.is_finite() {
        return Err(ReceiptRejection::NotANumber);
    }
    let floored = value.floor();
    if floored.abs() > MAX_QUANTITY as f64 {
        return Err(ReceiptRejection::OutOfRange);
    }
    Ok(floored as i64)
}

/// One delivery entry for a line of the order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_id: LineId,
    pub delivered: ReceiptDelta,
}

impl ReceiptLine {
    pub fn absolute(line_id: LineId, total: f64) -> Self {
        Self {
            line_id,
            delivered: ReceiptDelta::Absolute { total },
        }
    }

    pub fn incremental(line_id: LineId, delivered: f64) -> Self {
        Self {
            line_id,
            delivered: ReceiptDelta::Incremental { delivered },
        }
    }

    /// Build from the two mutually exclusive wire fields.
    pub fn from_parts(
        line_id: LineId,
        quantity_received_total: Option<f64>,
        new_delivery: Option<f64>,
    ) -> DomainResult<Self> {
        match (quantity_received_total, new_delivery) {
            (Some(total), None) => Ok(Self::absolute(line_id, total)),
            (None, Some(delivered)) => Ok(Self::incremental(line_id, delivered)),
            (Some(_), Some(_)) => Err(DomainError::validation(format!(
                "line {line_id}: supply either quantity_received_total or new_delivery, not both"
            ))),
            (None, None) => Err(DomainError::validation(format!(
                "line {line_id}: one of quantity_received_total or new_delivery is required"
            ))),
        }
    }
}

/// Why a receipt entry was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReceiptRejection {
    NotANumber,
    /// The quantity or the resulting total is outside the exact integer range.
    OutOfRange,
    BelowZero { resulting: i64 },
    AboveOrdered { resulting: i64, ordered: i64 },
}

impl core::fmt::Display for ReceiptRejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ReceiptRejection::NotANumber => f.write_str("quantity is not a finite number"),
            ReceiptRejection::OutOfRange => {
                write!(f, "quantity is outside the supported range (±{MAX_QUANTITY})")
            }
            ReceiptRejection::BelowZero { resulting } => {
                write!(f, "received quantity would drop below zero ({resulting})")
            }
            ReceiptRejection::AboveOrdered { resulting, ordered } => write!(
                f,
                "received quantity would exceed ordered quantity ({resulting} > {ordered})"
            ),
        }
    }
}

/// An accepted receipt entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptApplication {
    pub line_id: LineId,
    pub item_id: ItemId,
    pub previous_received: i64,
    pub new_received: i64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedReceipt {
    pub line_id: LineId,
    pub index: usize,
    pub rejection: ReceiptRejection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiptPlan {
    pub applications: Vec<ReceiptApplication>,
    /// Entries whose floored delta was zero.
    pub skipped: Vec<LineId>,
    pub rejected: Vec<RejectedReceipt>,
}

impl ReceiptPlan {
    pub fn is_noop(&self) -> bool {
        self.applications.is_empty()
    }

    /// Net stock change per item across all applications.
    pub fn stock_deltas(&self) -> HashMap<ItemId, i64> {
        let mut deltas: HashMap<ItemId, i64> = HashMap::new();
        for a in &self.applications {
            *deltas.entry(a.item_id).or_default() += a.delta;
        }
        deltas
    }

    /// Applications ordered by item, keeping request order within an item.
    ///
    /// Stores that row-lock items must increment in this order so two
    /// concurrent receipts never wait on each other's items.
    pub fn stock_write_order(&self) -> Vec<&ReceiptApplication> {
        let mut ordered: Vec<&ReceiptApplication> = self.applications.iter().collect();
        ordered.sort_by_key(|a| a.item_id);
        ordered
    }

    /// Write every application's new received quantity into `lines`.
    pub fn apply_to(&self, lines: &mut [PurchaseOrderLine]) {
        for a in &self.applications {
            if let Some(line) = lines.iter_mut().find(|l| l.line_id == a.line_id) {
                line.quantity_received = a.new_received;
            }
        }
    }
}

/// Plan a batch of receipts against the order's current `lines`.
///
/// An entry for a line not on the order fails the whole batch. Out-of-range
/// entries are rejected individually and the rest of the batch still proceeds.
pub fn plan_receipts(lines: &[PurchaseOrderLine], receipts: &[ReceiptLine]) -> DomainResult<ReceiptPlan> {
    if receipts.is_empty() {
        return Err(DomainError::validation("at least one receipt entry is required"));
    }

    let mut working: HashMap<LineId, (ItemId, i64, i64)> = lines
        .iter()
        .map(|l| (l.line_id, (l.item_id, l.quantity_ordered, l.quantity_received)))
        .collect();

    if let Some(unknown) = receipts.iter().find(|r| !working.contains_key(&r.line_id)) {
        return Err(DomainError::not_found(format!(
            "line {} on this order",
            unknown.line_id
        )));
    }

    let mut plan = ReceiptPlan::default();
    for (index, receipt) in receipts.iter().enumerate() {
        let Some(state) = working.get_mut(&receipt.line_id) else {
            continue;
        };
        let (item_id, ordered, current) = *state;

        let delta = match receipt.delivered.resolve(current) {
            Ok(delta) => delta,
            Err(rejection) => {
                plan.rejected.push(RejectedReceipt {
                    line_id: receipt.line_id,
                    index,
                    rejection,
                });
                continue;
            }
        };

        if delta == 0 {
            plan.skipped.push(receipt.line_id);
            continue;
        }

        let resulting = match current.checked_add(delta) {
            None => Err(ReceiptRejection::OutOfRange),
            Some(resulting) if resulting < 0 => Err(ReceiptRejection::BelowZero { resulting }),
            Some(resulting) if resulting > ordered => {
                Err(ReceiptRejection::AboveOrdered { resulting, ordered })
            }
            Some(resulting) => Ok(resulting),
        };
        let resulting = match resulting {
            Ok(resulting) => resulting,
            Err(rejection) => {
                plan.rejected.push(RejectedReceipt {
                    line_id: receipt.line_id,
                    index,
                    rejection,
                });
                continue;
            }
        };

        state.2 = resulting;
        plan.applications.push(ReceiptApplication {
            line_id: receipt.line_id,
            item_id,
            previous_received: current,
            new_received: resulting,
            delta,
        });
    }

    Ok(plan)
}

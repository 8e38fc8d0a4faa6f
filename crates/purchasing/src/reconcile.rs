//! Line reconciliation: turn a desired line set into create/update/delete intents.
//!
//! Reconciliation is pure planning. It never touches storage and it never
//! changes `quantity_received`: matched lines re-assert the persisted value and
//! new lines start at zero. Callers apply the resulting [`ReconcilePlan`]
//! inside their unit of work.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use forgeproc_core::{DomainError, DomainResult};
use forgeproc_inventory::ItemId;

use crate::order::{LineId, PurchaseOrderId, PurchaseOrderLine};

/// Largest quantity magnitude accepted anywhere in the engine.
///
/// Receipts travel as `f64`, which represents integers exactly only up to 2^53.
pub const MAX_QUANTITY: i64 = (1 << 53) - 1;

/// Quantity as it arrives from a client.
///
/// Form-backed clients send numbers as strings and some send floats; both are
/// accepted as long as they denote a whole number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawQuantity {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl RawQuantity {
    /// Whole units, or a description of why the value is not a whole number.
    pub fn to_units(&self) -> Result<i64, String> {
        match self {
            RawQuantity::Integer(v) => integer_to_units(*v),
            RawQuantity::Decimal(v) => decimal_to_units(*v),
            RawQuantity::Text(s) => {
                let s = s.trim();
                if let Ok(v) = s.parse::<i64>() {
                    return integer_to_units(v);
                }
                match s.parse::<f64>() {
                    Ok(v) => decimal_to_units(v),
                    Err(_) => Err(format!("'{s}' is not a number")),
                }
            }
        }
    }
}

fn integer_to_units(v: i64) -> Result<i64, String> {
    if v.unsigned_abs() > MAX_QUANTITY as u64 {
        return Err(format!("{v} is out of range"));
    }
    Ok(v)
}

fn decimal_to_units(v: f64) -> Result<i64, String> {
    if !v.is_finite() {
        return Err(format!("{v} is not a finite number"));
    }
    if v.fract() != 0.0 {
        return Err(format!("{v} is not a whole number"));
    }
    if v.abs() > MAX_QUANTITY as f64 {
        return Err(format!("{v} is out of range"));
    }
    Ok(v as i64)
}

impl From<i64> for RawQuantity {
    fn from(value: i64) -> Self {
        RawQuantity::Integer(value)
    }
}

/// One desired line, as supplied by a line-edit request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSpec {
    pub item_id: ItemId,
    pub quantity_ordered: RawQuantity,
    #[serde(default)]
    pub unit_price: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub line_id: Option<LineId>,
}

impl LineSpec {
    pub fn new(item_id: ItemId, quantity_ordered: i64) -> Self {
        Self {
            item_id,
            quantity_ordered: RawQuantity::Integer(quantity_ordered),
            unit_price: None,
            notes: None,
            line_id: None,
        }
    }

    pub fn with_line_id(mut self, line_id: LineId) -> Self {
        self.line_id = Some(line_id);
        self
    }

    pub fn with_unit_price(mut self, unit_price: i64) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A single scheduled persistence operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LineIntent {
    Create(PurchaseOrderLine),
    Update(PurchaseOrderLine),
    Delete(LineId),
}

/// Result of reconciling one order's lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub intents: Vec<LineIntent>,
    /// Matched lines whose persisted state already equals the desired state.
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn creates(&self) -> impl Iterator<Item = &PurchaseOrderLine> {
        self.intents.iter().filter_map(|i| match i {
            LineIntent::Create(l) => Some(l),
            _ => None,
        })
    }

    pub fn updates(&self) -> impl Iterator<Item = &PurchaseOrderLine> {
        self.intents.iter().filter_map(|i| match i {
            LineIntent::Update(l) => Some(l),
            _ => None,
        })
    }

    pub fn deletes(&self) -> impl Iterator<Item = LineId> + '_ {
        self.intents.iter().filter_map(|i| match i {
            LineIntent::Delete(id) => Some(*id),
            _ => None,
        })
    }

    /// Intents in the order a store with a per-order unique item constraint must apply them:
    /// deletes, then updates, then creates.
    pub fn ordered_for_write(&self) -> Vec<&LineIntent> {
        let rank = |i: &LineIntent| match i {
            LineIntent::Delete(_) => 0,
            LineIntent::Update(_) => 1,
            LineIntent::Create(_) => 2,
        };
        let mut ordered: Vec<&LineIntent> = self.intents.iter().collect();
        ordered.sort_by_key(|i| rank(i));
        ordered
    }

    /// The line set that results from applying this plan to `existing`.
    pub fn apply_to(&self, existing: &[PurchaseOrderLine]) -> Vec<PurchaseOrderLine> {
        let deleted: HashSet<LineId> = self.deletes().collect();
        let updated: HashMap<LineId, &PurchaseOrderLine> =
            self.updates().map(|l| (l.line_id, l)).collect();

        let mut lines: Vec<PurchaseOrderLine> = existing
            .iter()
            .filter(|l| !deleted.contains(&l.line_id))
            .map(|l| updated.get(&l.line_id).map(|u| (*u).clone()).unwrap_or_else(|| l.clone()))
            .collect();
        lines.extend(self.creates().cloned());
        lines
    }

    /// `(created, updated, deleted)` counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.creates().count(), self.updates().count(), self.deletes().count())
    }
}

/// A `LineSpec` that passed validation, with its quantity resolved to whole units.
struct ValidSpec<'a> {
    index: usize,
    spec: &'a LineSpec,
    quantity_ordered: i64,
}

/// Reconcile `existing` lines of `order_id` against the `desired` set.
///
/// `owned_items` must contain every referenced item that belongs to the caller's
/// tenant; anything else is reported as not found. The whole batch is validated
/// before any intent is produced, so an error means nothing should be written.
pub fn reconcile(
    order_id: PurchaseOrderId,
    existing: &[PurchaseOrderLine],
    desired: &[LineSpec],
    owned_items: &HashSet<ItemId>,
) -> DomainResult<ReconcilePlan> {
    let valid = validate_specs(desired, owned_items)?;

    let by_line: HashMap<LineId, &PurchaseOrderLine> =
        existing.iter().map(|l| (l.line_id, l)).collect();
    let by_item: HashMap<ItemId, &PurchaseOrderLine> =
        existing.iter().map(|l| (l.item_id, l)).collect();

    let mut kept: HashMap<LineId, usize> = HashMap::new();
    let mut plan = ReconcilePlan::default();

    for v in &valid {
        let matched_by_line = v.spec.line_id.and_then(|id| by_line.get(&id).copied());
        let matched = matched_by_line.or_else(|| by_item.get(&v.spec.item_id).copied());

        let Some(current) = matched else {
            plan.intents.push(LineIntent::Create(PurchaseOrderLine {
                line_id: LineId::generate(),
                order_id,
                item_id: v.spec.item_id,
                quantity_ordered: v.quantity_ordered,
                quantity_received: 0,
                unit_price: v.spec.unit_price,
                notes: v.spec.notes.clone(),
            }));
            continue;
        };

        if let Some(first) = kept.insert(current.line_id, v.index) {
            return Err(DomainError::validation(format!(
                "line {}: line {} is already matched by line {first}",
                v.index, current.line_id
            )));
        }

        if current.item_id != v.spec.item_id && current.quantity_received > 0 {
            return Err(DomainError::validation(format!(
                "line {}: line {} has received stock for item {}; remove it and add a new line to order item {}",
                v.index, current.line_id, current.item_id, v.spec.item_id
            )));
        }

        if v.quantity_ordered < current.quantity_received {
            return Err(DomainError::validation(format!(
                "line {}: quantity_ordered {} is below the {} already received on line {}",
                v.index, v.quantity_ordered, current.quantity_received, current.line_id
            )));
        }

        let updated = PurchaseOrderLine {
            line_id: current.line_id,
            order_id: current.order_id,
            item_id: v.spec.item_id,
            quantity_ordered: v.quantity_ordered,
            quantity_received: current.quantity_received,
            unit_price: v.spec.unit_price,
            notes: v.spec.notes.clone(),
        };

        if &updated == current {
            plan.unchanged += 1;
        } else {
            plan.intents.push(LineIntent::Update(updated));
        }
    }

    for line in existing {
        if !kept.contains_key(&line.line_id) {
            plan.intents.push(LineIntent::Delete(line.line_id));
        }
    }

    Ok(plan)
}

fn validate_specs<'a>(
    desired: &'a [LineSpec],
    owned_items: &HashSet<ItemId>,
) -> DomainResult<Vec<ValidSpec<'a>>> {
    let mut seen_items: HashMap<ItemId, usize> = HashMap::with_capacity(desired.len());
    let mut valid = Vec::with_capacity(desired.len());

    for (index, spec) in desired.iter().enumerate() {
        let quantity_ordered = spec
            .quantity_ordered
            .to_units()
            .map_err(|e| DomainError::validation(format!("line {index}: quantity_ordered {e}")))?;
        if quantity_ordered <= 0 {
            return Err(DomainError::validation(format!(
                "line {index}: quantity_ordered must be positive (got {quantity_ordered})"
            )));
        }

        if let Some(price) = spec.unit_price {
            if price < 0 {
                return Err(DomainError::validation(format!(
                    "line {index}: unit_price cannot be negative (got {price})"
                )));
            }
        }

        if let Some(first) = seen_items.insert(spec.item_id, index) {
            return Err(DomainError::validation(format!(
                "line {index}: item {} duplicates line {first}",
                spec.item_id
            )));
        }

        if !owned_items.contains(&spec.item_id) {
            return Err(DomainError::not_found(format!(
                "item {} (line {index})",
                spec.item_id
            )));
        }

        valid.push(ValidSpec {
            index,
            spec,
            quantity_ordered,
        });
    }

    Ok(valid)
}

//! Append-only stock ledger.
//!
//! Every increment the engine applies to an item's counter is written as a
//! `StockMovement` in the same transaction, so the counter can be audited and
//! rebuilt with [`replay_movements`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeproc_core::{AggregateId, TenantId, typed_id};

use crate::item::ItemId;

typed_id!(
    /// Stock movement identifier.
    StockMovementId
);

/// Why stock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    /// Goods received against a purchase order line.
    Receipt,
    /// A previously over-reported receipt was corrected downwards.
    Correction,
}

impl MovementReason {
    /// Receipt for positive deltas, correction for negative ones.
    pub fn for_delta(delta: i64) -> Self {
        if delta < 0 {
            MovementReason::Correction
        } else {
            MovementReason::Receipt
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Receipt => "RECEIPT",
            MovementReason::Correction => "CORRECTION",
        }
    }
}

impl core::str::FromStr for MovementReason {
    type Err = forgeproc_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIPT" => Ok(MovementReason::Receipt),
            "CORRECTION" => Ok(MovementReason::Correction),
            other => Err(forgeproc_core::DomainError::validation(format!(
                "unknown movement reason '{other}'"
            ))),
        }
    }
}

/// The order line a movement originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementSource {
    pub order_id: AggregateId,
    pub line_id: AggregateId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub movement_id: StockMovementId,
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub delta: i64,
    pub source: MovementSource,
    pub reason: MovementReason,
    pub recorded_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(
        tenant_id: TenantId,
        item_id: ItemId,
        delta: i64,
        source: MovementSource,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            movement_id: StockMovementId::generate(),
            tenant_id,
            item_id,
            delta,
            source,
            reason: MovementReason::for_delta(delta),
            recorded_at,
        }
    }
}

/// Rebuild a counter from its starting value and the movements recorded since.
///
/// Order does not matter: movements are deltas and compose additively.
pub fn replay_movements<'a>(initial: i64, movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements
        .into_iter()
        .fold(initial, |acc, m| acc.saturating_add(m.delta))
}

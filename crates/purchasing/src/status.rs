//! Purchase order status lifecycle and its derivation from receipt progress.

use serde::{Deserialize, Serialize};

use forgeproc_core::DomainError;

use crate::order::PurchaseOrderLine;

/// Purchase order status lifecycle.
///
/// `Cancelled` is terminal for derivation: it is only ever set explicitly and
/// never produced by [`derive_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    #[default]
    Draft,
    Ordered,
    PartiallyReceived,
    FullyReceived,
    Cancelled,
}

impl PurchaseOrderStatus {
    /// Every accepted status value.
    pub const ALL: [PurchaseOrderStatus; 5] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Ordered,
        PurchaseOrderStatus::PartiallyReceived,
        PurchaseOrderStatus::FullyReceived,
        PurchaseOrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "DRAFT",
            PurchaseOrderStatus::Ordered => "ORDERED",
            PurchaseOrderStatus::PartiallyReceived => "PARTIALLY_RECEIVED",
            PurchaseOrderStatus::FullyReceived => "FULLY_RECEIVED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Cancelled)
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    /// Parse against the fixed allow-list (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(PurchaseOrderStatus::Draft),
            "ORDERED" => Ok(PurchaseOrderStatus::Ordered),
            "PARTIALLY_RECEIVED" => Ok(PurchaseOrderStatus::PartiallyReceived),
            "FULLY_RECEIVED" => Ok(PurchaseOrderStatus::FullyReceived),
            "CANCELLED" | "CANCELED" => Ok(PurchaseOrderStatus::Cancelled),
            _ => Err(DomainError::validation(format!(
                "unknown status '{s}' (expected one of: DRAFT, ORDERED, PARTIALLY_RECEIVED, FULLY_RECEIVED, CANCELLED)"
            ))),
        }
    }
}

/// Derive an order's status from its lines' receipt progress.
///
/// Only escalates toward "more received": an order with nothing received keeps
/// whatever it had (so a manually set `Ordered` is never demoted to `Draft`).
pub fn derive_status(current: PurchaseOrderStatus, lines: &[PurchaseOrderLine]) -> PurchaseOrderStatus {
    if current.is_cancelled() {
        return current;
    }

    if !lines.is_empty() && lines.iter().all(PurchaseOrderLine::is_fully_received) {
        PurchaseOrderStatus::FullyReceived
    } else if lines.iter().any(|l| l.quantity_received > 0) {
        PurchaseOrderStatus::PartiallyReceived
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{LineId, PurchaseOrderId};
    use forgeproc_inventory::ItemId;
    use proptest::prelude::*;

    fn line(ordered: i64, received: i64) -> PurchaseOrderLine {
        PurchaseOrderLine {
            line_id: LineId::generate(),
            order_id: PurchaseOrderId::generate(),
            item_id: ItemId::generate(),
            quantity_ordered: ordered,
            quantity_received: received,
            unit_price: None,
            notes: None,
        }
    }

    #[test]
    fn parse_accepts_allow_list_case_insensitively() {
        for s in PurchaseOrderStatus::ALL {
            assert_eq!(s.as_str().parse::<PurchaseOrderStatus>().unwrap(), s);
            assert_eq!(s.as_str().to_lowercase().parse::<PurchaseOrderStatus>().unwrap(), s);
        }
        assert_eq!(
            "canceled".parse::<PurchaseOrderStatus>().unwrap(),
            PurchaseOrderStatus::Cancelled
        );
    }

    #[test]
    fn parse_rejects_unknown_values() {
        let err = "SHIPPED".parse::<PurchaseOrderStatus>().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("SHIPPED")));
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&PurchaseOrderStatus::PartiallyReceived).unwrap();
        assert_eq!(json, "\"PARTIALLY_RECEIVED\"");
    }

    #[test]
    fn no_lines_keeps_current_status() {
        assert_eq!(
            derive_status(PurchaseOrderStatus::Ordered, &[]),
            PurchaseOrderStatus::Ordered
        );
    }

    #[test]
    fn nothing_received_never_demotes_ordered() {
        let lines = vec![line(10, 0), line(5, 0)];
        assert_eq!(
            derive_status(PurchaseOrderStatus::Ordered, &lines),
            PurchaseOrderStatus::Ordered
        );
        assert_eq!(
            derive_status(PurchaseOrderStatus::Draft, &lines),
            PurchaseOrderStatus::Draft
        );
    }

    #[test]
    fn some_received_is_partial() {
        let lines = vec![line(10, 4), line(5, 0)];
        assert_eq!(
            derive_status(PurchaseOrderStatus::Draft, &lines),
            PurchaseOrderStatus::PartiallyReceived
        );
    }

    #[test]
    fn all_received_is_full() {
        let lines = vec![line(10, 10), line(5, 5)];
        assert_eq!(
            derive_status(PurchaseOrderStatus::PartiallyReceived, &lines),
            PurchaseOrderStatus::FullyReceived
        );
    }

    #[test]
    fn cancelled_is_never_rederived() {
        let lines = vec![line(10, 10)];
        assert_eq!(
            derive_status(PurchaseOrderStatus::Cancelled, &lines),
            PurchaseOrderStatus::Cancelled
        );
    }

    proptest! {
        /// Derivation is idempotent: deriving from a derived status yields the same status.
        #[test]
        fn derivation_is_idempotent(
            specs in proptest::collection::vec((1i64..50, 0i64..50), 0..10),
            start in 0usize..4
        ) {
            let lines: Vec<_> = specs
                .into_iter()
                .map(|(ordered, received)| line(ordered, received.min(ordered)))
                .collect();
            let current = PurchaseOrderStatus::ALL[start];
            let once = derive_status(current, &lines);
            prop_assert_eq!(derive_status(once, &lines), once);
        }

        /// A fully received order stays fully received as long as every line stays received.
        #[test]
        fn fully_received_is_stable(
            ordered in proptest::collection::vec(1i64..50, 1..10)
        ) {
            let lines: Vec<_> = ordered.iter().map(|q| line(*q, *q)).collect();
            let status = derive_status(PurchaseOrderStatus::Draft, &lines);
            prop_assert_eq!(status, PurchaseOrderStatus::FullyReceived);
            prop_assert_eq!(derive_status(status, &lines), PurchaseOrderStatus::FullyReceived);
        }
    }
}

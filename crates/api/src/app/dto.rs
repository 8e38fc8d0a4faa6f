use serde::{Deserialize, Serialize};

use forgeproc_core::DomainResult;
use forgeproc_infra::{OperationWarning, Outcome};
use forgeproc_purchasing::{LineId, LineSpec, RawQuantity, ReceiptLine};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub order_number: String,
    #[serde(default)]
    pub lines: Vec<LineSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceLinesRequest {
    pub lines: Vec<LineSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptEntryRequest {
    pub line_id: LineId,
    #[serde(default)]
    pub quantity_received_total: Option<RawQuantity>,
    #[serde(default)]
    pub new_delivery: Option<RawQuantity>,
}

impl ReceiptEntryRequest {
    /// Unparseable quantities become NaN so they are rejected per line, not per request.
    pub fn to_receipt_line(&self) -> DomainResult<ReceiptLine> {
        ReceiptLine::from_parts(
            self.line_id,
            self.quantity_received_total.as_ref().map(raw_to_f64),
            self.new_delivery.as_ref().map(raw_to_f64),
        )
    }
}

fn raw_to_f64(raw: &RawQuantity) -> f64 {
    match raw {
        RawQuantity::Integer(v) => *v as f64,
        RawQuantity::Decimal(v) => *v,
        RawQuantity::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordReceiptRequest {
    pub receipts: Vec<ReceiptEntryRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ForceStatusRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

/// Operation result with its warnings inlined next to the payload.
#[derive(Debug, Serialize)]
pub struct OutcomeResponse<T> {
    #[serde(flatten)]
    pub body: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<OperationWarning>,
}

impl<T> From<Outcome<T>> for OutcomeResponse<T> {
    fn from(outcome: Outcome<T>) -> Self {
        Self {
            body: outcome.value,
            warnings: outcome.warnings,
        }
    }
}

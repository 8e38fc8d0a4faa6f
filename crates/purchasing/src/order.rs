use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use forgeproc_core::{AggregateId, AggregateRoot, DomainError, DomainResult, TenantId, typed_id};
use forgeproc_inventory::ItemId;

use crate::status::PurchaseOrderStatus;

typed_id!(
    /// Purchase order identifier (tenant-scoped via the order's `tenant_id`).
    PurchaseOrderId
);

typed_id!(
    /// Purchase order line identifier.
    LineId
);

const MAX_ORDER_NUMBER_LEN: usize = 64;

/// Human-readable order number, unique per tenant and immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("order_number cannot be empty"));
        }
        if trimmed.len() > MAX_ORDER_NUMBER_LEN {
            return Err(DomainError::validation(format!(
                "order_number cannot exceed {MAX_ORDER_NUMBER_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        OrderNumber::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Purchase order header (lines are stored separately and owned by the order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub tenant_id: TenantId,
    pub order_number: OrderNumber,
    pub status: PurchaseOrderStatus,
    pub notes: Option<String>,
    /// Minor currency units. Stored, never computed.
    pub total_amount: Option<i64>,
    /// Minor currency units. Stored, never computed.
    pub delivery_charge: Option<i64>,
    pub ordered_at: Option<DateTime<Utc>>,
    pub invoice_date: Option<NaiveDate>,
    /// Key of the invoice attachment in the blob store.
    pub invoice_ref: Option<String>,
    /// Originating materials-to-order request.
    pub materials_request_id: Option<AggregateId>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    /// A new, not-yet-persisted order in `Draft`.
    pub fn draft(
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        order_number: OrderNumber,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            tenant_id,
            order_number,
            status: PurchaseOrderStatus::Draft,
            notes: None,
            total_amount: None,
            delivery_charge: None,
            ordered_at: None,
            invoice_date: None,
            invoice_ref: None,
            materials_request_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a non-line field patch. Returns the names of the fields that changed.
    ///
    /// `status` in the patch is not applied here; see [`OrderFieldsPatch::requested_status`].
    pub fn apply_fields(&mut self, patch: &OrderFieldsPatch, now: DateTime<Utc>) -> DomainResult<Vec<&'static str>> {
        patch.validate()?;

        let mut changed = Vec::new();
        set_if_changed(&mut self.notes, &patch.notes, "notes", &mut changed);
        set_if_changed(&mut self.total_amount, &patch.total_amount, "total_amount", &mut changed);
        set_if_changed(&mut self.delivery_charge, &patch.delivery_charge, "delivery_charge", &mut changed);
        set_if_changed(&mut self.ordered_at, &patch.ordered_at, "ordered_at", &mut changed);
        set_if_changed(&mut self.invoice_date, &patch.invoice_date, "invoice_date", &mut changed);
        set_if_changed(&mut self.invoice_ref, &patch.invoice_ref, "invoice_ref", &mut changed);
        set_if_changed(
            &mut self.materials_request_id,
            &patch.materials_request_id,
            "materials_request_id",
            &mut changed,
        );

        if !changed.is_empty() {
            self.updated_at = now;
        }
        Ok(changed)
    }

    /// Set the status directly, bypassing derivation. Returns the previous status.
    pub fn force_status(&mut self, status: PurchaseOrderStatus, now: DateTime<Utc>) -> PurchaseOrderStatus {
        let previous = self.status;
        if previous != status {
            self.status = status;
            self.updated_at = now;
        }
        previous
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.order_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn set_if_changed<T: Clone + PartialEq>(
    target: &mut Option<T>,
    update: &Option<Option<T>>,
    name: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if let Some(value) = update {
        if target != value {
            *target = value.clone();
            changed.push(name);
        }
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub line_id: LineId,
    pub order_id: PurchaseOrderId,
    pub item_id: ItemId,
    pub quantity_ordered: i64,
    /// Only ever changed by receipt processing.
    pub quantity_received: i64,
    /// Minor currency units.
    pub unit_price: Option<i64>,
    pub notes: Option<String>,
}

impl PurchaseOrderLine {
    pub fn is_fully_received(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }

    pub fn outstanding(&self) -> i64 {
        (self.quantity_ordered - self.quantity_received).max(0)
    }
}

/// An order together with its current lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithLines {
    pub order: PurchaseOrder,
    pub lines: Vec<PurchaseOrderLine>,
}

/// Patch for non-line order attributes.
///
/// Every field is tri-state: absent leaves the value alone, `null` clears it,
/// a value sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFieldsPatch {
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub delivery_charge: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub ordered_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub invoice_ref: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub materials_request_id: Option<Option<AggregateId>>,
    /// Direct status override, validated against the status allow-list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl OrderFieldsPatch {
    pub fn validate(&self) -> DomainResult<()> {
        for (name, value) in [
            ("total_amount", &self.total_amount),
            ("delivery_charge", &self.delivery_charge),
        ] {
            if let Some(Some(v)) = value {
                if *v < 0 {
                    return Err(DomainError::validation(format!("{name} cannot be negative")));
                }
            }
        }
        if let Some(Some(r)) = &self.invoice_ref {
            if r.trim().is_empty() {
                return Err(DomainError::validation("invoice_ref cannot be blank"));
            }
        }
        self.requested_status()?;
        Ok(())
    }

    /// The status override carried by this patch, if any, parsed against the allow-list.
    pub fn requested_status(&self) -> DomainResult<Option<PurchaseOrderStatus>> {
        self.status.as_deref().map(str::parse).transpose()
    }

    pub fn is_empty(&self) -> bool {
        self == &OrderFieldsPatch::default()
    }
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

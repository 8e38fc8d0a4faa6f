//! Audit sink that writes activity history to the `audit` tracing target.

use serde::Serialize;

use crate::envelope::EventEnvelope;
use crate::sink::{AuditError, AuditSink};

/// Logs every envelope as a structured `info` record.
///
/// With the JSON subscriber installed by the observability crate this yields
/// one machine-readable activity line per committed change.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl<E> AuditSink<EventEnvelope<E>> for TracingAuditSink
where
    E: Serialize + Send + 'static,
{
    fn publish(&self, message: EventEnvelope<E>) -> Result<(), AuditError> {
        let payload = serde_json::to_string(message.payload())
            .map_err(|e| AuditError::Unavailable(format!("payload serialization failed: {e}")))?;

        tracing::info!(
            target: "audit",
            event_id = %message.event_id(),
            tenant_id = %message.tenant_id(),
            aggregate_type = message.aggregate_type(),
            aggregate_id = %message.aggregate_id(),
            event_type = message.event_type(),
            occurred_at = %message.occurred_at(),
            payload = %payload,
            "{}",
            message.summary()
        );
        Ok(())
    }
}

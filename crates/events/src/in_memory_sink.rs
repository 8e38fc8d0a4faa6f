//! In-memory audit sink for tests/dev.

use std::sync::Mutex;

use forgeproc_core::TenantId;

use crate::sink::{AuditError, AuditSink};
use crate::tenant::TenantScoped;

/// In-memory sink.
///
/// - Records every published message (inspectable with [`published`](Self::published))
/// - Can be switched into a failing mode to exercise degraded-audit paths
#[derive(Debug)]
pub struct InMemoryAuditSink<M> {
    published: Mutex<Vec<M>>,
    failing: Mutex<Option<String>>,
}

impl<M> InMemoryAuditSink<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail with the given reason (`None` restores).
    pub fn set_failing(&self, reason: Option<&str>) {
        if let Ok(mut f) = self.failing.lock() {
            *f = reason.map(str::to_string);
        }
    }
}

impl<M> Default for InMemoryAuditSink<M> {
    fn default() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failing: Mutex::new(None),
        }
    }
}

impl<M: Clone> InMemoryAuditSink<M> {
    pub fn published(&self) -> Vec<M> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl<M: Clone + TenantScoped> InMemoryAuditSink<M> {
    pub fn published_for(&self, tenant_id: TenantId) -> Vec<M> {
        self.published()
            .into_iter()
            .filter(|m| m.tenant_id() == tenant_id)
            .collect()
    }
}

impl<M> AuditSink<M> for InMemoryAuditSink<M>
where
    M: Send + 'static,
{
    fn publish(&self, message: M) -> Result<(), AuditError> {
        if let Some(reason) = self.failing.lock().map_err(|_| AuditError::Poisoned)?.clone() {
            return Err(AuditError::Unavailable(reason));
        }

        self.published
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(message);
        Ok(())
    }
}

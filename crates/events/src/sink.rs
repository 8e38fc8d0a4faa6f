//! Audit sink abstraction (activity-history collaborator).
//!
//! Mutating operations emit one [`EventEnvelope`](crate::EventEnvelope) per
//! committed change. The sink is **fire-and-forget** from the caller's point of
//! view: publication happens after the store commit, and a failing sink never
//! rolls anything back. Callers surface the failure as a warning instead.

use std::sync::Arc;

use thiserror::Error;

/// Failure to hand an event to the audit collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    /// The sink rejected or could not accept the message.
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    /// Internal lock poisoning.
    #[error("audit sink poisoned")]
    Poisoned,
}

/// Destination for audit events.
///
/// Implementations must be safe to share across request tasks.
pub trait AuditSink<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), AuditError>;
}

impl<M, S> AuditSink<M> for Arc<S>
where
    S: AuditSink<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), AuditError> {
        (**self).publish(message)
    }
}

/// Publishes to every inner sink; the first failure is returned after all were tried.
pub struct FanoutSink<M> {
    sinks: Vec<Arc<dyn AuditSink<M>>>,
}

impl<M> FanoutSink<M> {
    pub fn new(sinks: Vec<Arc<dyn AuditSink<M>>>) -> Self {
        Self { sinks }
    }
}

impl<M> AuditSink<M> for FanoutSink<M>
where
    M: Clone + Send + Sync,
{
    fn publish(&self, message: M) -> Result<(), AuditError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(message.clone()) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

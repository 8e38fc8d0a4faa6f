//! Domain events and the audit-sink collaborator.
//!
//! The engine does not store activity history itself. It describes every
//! committed change as an [`Event`], wraps it in a tenant-scoped
//! [`EventEnvelope`] and hands it to an [`AuditSink`].

pub mod envelope;
pub mod event;
pub mod in_memory_sink;
pub mod sink;
pub mod tenant;
pub mod tracing_sink;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_sink::InMemoryAuditSink;
pub use sink::{AuditError, AuditSink, FanoutSink};
pub use tenant::TenantScoped;
pub use tracing_sink::TracingAuditSink;

//! Service wiring: picks the store backend and audit sinks from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use forgeproc_events::{AuditSink, EventEnvelope, FanoutSink, TracingAuditSink};
use forgeproc_infra::{
    EngineConfig, InMemoryPurchaseOrderStore, OrderLifecycleService, PostgresPurchaseOrderStore,
    PurchaseOrderStore, StoreBackend,
};
use forgeproc_purchasing::PurchaseOrderEvent;

pub type AuditEnvelope = EventEnvelope<PurchaseOrderEvent>;
pub type DynStore = Arc<dyn PurchaseOrderStore>;
pub type DynAudit = Arc<dyn AuditSink<AuditEnvelope>>;

/// Everything a handler needs; shared behind an `Arc` extension.
pub struct AppServices {
    pub lifecycle: OrderLifecycleService<DynStore, DynAudit>,
}

impl AppServices {
    pub fn new(store: DynStore, audit: DynAudit, tx_timeout: Duration) -> Self {
        Self {
            lifecycle: OrderLifecycleService::new(store, audit, tx_timeout),
        }
    }

    /// In-memory store with the default audit sinks.
    pub fn in_memory(store: InMemoryPurchaseOrderStore, tx_timeout: Duration) -> Self {
        Self::new(Arc::new(store), default_audit(), tx_timeout)
    }
}

/// Audit events go to the `audit` tracing target.
pub fn default_audit() -> DynAudit {
    Arc::new(FanoutSink::new(vec![Arc::new(TracingAuditSink::new())
        as Arc<dyn AuditSink<AuditEnvelope>>]))
}

pub async fn build_services(config: &EngineConfig) -> anyhow::Result<AppServices> {
    let store: DynStore = match &config.store {
        StoreBackend::InMemory => {
            tracing::warn!("using in-memory purchase order store; data is lost on restart");
            Arc::new(InMemoryPurchaseOrderStore::new())
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresPurchaseOrderStore::connect(database_url, *max_connections, config.tx_timeout)
                .await
                .context("connecting to postgres")?;
            store.ensure_schema().await.context("applying schema")?;
            tracing::info!(max_connections, "using postgres purchase order store");
            Arc::new(store)
        }
    };

    Ok(AppServices::new(store, default_audit(), config.tx_timeout))
}

//! Infrastructure layer: persistence, transactions, config and the lifecycle service.

pub mod config;
pub mod lifecycle;
pub mod store;

mod integration_tests;

pub use config::{ConfigError, EngineConfig, StoreBackend};
pub use lifecycle::{
    LifecycleError, OperationWarning, OrderLifecycleService, Outcome, ReceiptReport, StockLedger,
};
pub use store::{
    FailPoint, InMemoryPurchaseOrderStore, PostgresPurchaseOrderStore, PurchaseOrderStore,
    StoreError, UnitOfWork,
};

//! Inventory collaborator model.
//!
//! The engine does not own items. It only treats an item's stock quantity as a
//! tenant-scoped counter that it increments by signed deltas, and it records
//! every such increment as an append-only [`StockMovement`].

pub mod item;
pub mod movement;

pub use item::{Item, ItemId};
pub use movement::{MovementReason, MovementSource, StockMovement, StockMovementId, replay_movements};

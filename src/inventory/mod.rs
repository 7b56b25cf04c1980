//! Origin inventories and the per-origin state machine.

mod commands;
mod monitored;
mod origins_inventory;
mod state;

pub use commands::{EventBus, OriginsCommand};
pub use origins_inventory::{InventoryOptions, OriginsInventory, OriginsInventoryBuilder};
pub use state::{OriginEvent, OriginState, Transition};

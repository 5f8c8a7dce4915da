//! Playbook execution: the event model, the JSON-lines event stream, the
//! inventory and catalog compilers, and the process runner.

pub mod catalog;
pub mod event;
pub mod inventory;
pub mod runner;
pub mod stream;

pub use catalog::ClusterCatalog;
pub use event::Event;
pub use inventory::{Inventory, InventoryNode, Role};
pub use runner::PlaybookRunner;
pub use stream::event_stream;

//! The controller: loader (configuration to validated graph) and
//! scheduler (graph to running components).

pub mod loader;
pub mod node;
pub mod scheduler;

pub use loader::load_codes;
pub use node::{ComponentNode, ConfigBlockNode, Node};
pub use scheduler::{Runtime, RuntimeOptions, SHUTDOWN_GRACE};

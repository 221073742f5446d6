//! Metadata records and the node registry

mod node;
mod registry;
pub mod wire;


pub use node::{FileNode, MetaNode, NodeId, NodeState, Record, Row, FILES_TABLE};
pub use registry::{NodeRegistry, RegistryError, RegistryResult};
pub use wire::{WireError, WireResult};

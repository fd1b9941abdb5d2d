//! Schedule IR.
//!
//! This module defines the tree the schedule primitives rewrite:
//! - node: tagged nodes addressed by `NodeId`
//! - tensor: tensors, buffers and scope/device tags
//! - module: the arena owning nodes, tensors and buffers
//! - registry: alias groups of tensors sharing one buffer
//! - builder: constructors for test and driver programs
//! - printer: textual rendering

pub mod node;
pub mod tensor;
pub mod module;
pub mod registry;
pub mod builder;
pub mod printer;

pub use node::*;
pub use tensor::*;
pub use module::Module;
pub use registry::AliasRegistry;
pub use builder::{IrBuilder, ROOT_BLOCK_NAME};
pub use printer::NodeRef;

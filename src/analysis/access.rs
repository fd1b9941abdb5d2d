//! Extraction of tensor accesses from realized blocks.

use crate::ir::module::Module;
use crate::ir::node::{NodeId, NodeKind};
use crate::utils::errors::{ScheduleError, ScheduleResult};

/// Direction of a tensor access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    fn matches(self, kind: &NodeKind) -> bool {
        match self {
            AccessKind::Read => matches!(kind, NodeKind::Load { .. }),
            AccessKind::Write => matches!(kind, NodeKind::Store { .. }),
        }
    }
}

/// All loads or stores in the body of a realized block, in pre-order.
pub fn accesses(module: &Module, block: NodeId, kind: AccessKind) -> Vec<NodeId> {
    match module.block_body(block) {
        Some(body) => module.collect(body, |_, k| kind.matches(k), false),
        None => Vec::new(),
    }
}

/// The `index`-th load (`Read`) or store (`Write`) of a realized block.
pub fn nth_access(module: &Module, block: NodeId, index: usize, kind: AccessKind) -> ScheduleResult<NodeId> {
    let found = accesses(module, block, kind);
    found.get(index).copied().ok_or_else(|| {
        let what = match kind {
            AccessKind::Read => "load",
            AccessKind::Write => "store",
        };
        ScheduleError::unsupported_access(format!(
            "{} index {} out of range: block has {} {}s",
            what,
            index,
            found.len(),
            what
        ))
        .at(block)
    })
}

/// Loads and stores under `root` whose tensor is named `name`.
pub fn accesses_of_named(module: &Module, root: NodeId, name: &str) -> Vec<NodeId> {
    module.collect(
        root,
        |_, k| k.accessed_tensor().map_or(false, |t| module.tensor_name(t) == name),
        false,
    )
}

/// Stores under `root` whose tensor is named `name`.
pub fn stores_of_named(module: &Module, root: NodeId, name: &str) -> Vec<NodeId> {
    module.collect(
        root,
        |_, k| match k {
            NodeKind::Store { tensor, .. } => module.tensor_name(*tensor) == name,
            _ => false,
        },
        false,
    )
}

/// Loads and stores under `root` of tensors bound to the buffer named `buffer`.
pub fn accesses_of_buffer(module: &Module, root: NodeId, buffer: &str) -> Vec<NodeId> {
    module.collect(
        root,
        |_, k| {
            k.accessed_tensor()
                .and_then(|t| module.buffer_of(t))
                .map_or(false, |b| b.name == buffer)
        },
        false,
    )
}

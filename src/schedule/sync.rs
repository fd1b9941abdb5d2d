//! Barrier insertion.

use crate::ir::module::Module;
use crate::ir::node::{CallKind, NodeId, NodeKind};
use crate::utils::errors::{ScheduleError, ScheduleResult};
use log::debug;

/// Name of the thread barrier intrinsic.
pub const SYNC_THREADS: &str = "__syncthreads";

/// Insert a `__syncthreads()` call right before or right after `node` in its
/// parent sequence. Returns the call.
pub fn sync_threads(module: &mut Module, node: NodeId, after: bool) -> ScheduleResult<NodeId> {
    let kind = module.kind(node);
    if !kind.is_realize() && !kind.is_for() {
        return Err(ScheduleError::invalid_node_kind(
            node,
            "ScheduleBlockRealize or For",
            kind.variant_name(),
        ));
    }
    if module.parent(node).is_none() {
        return Err(ScheduleError::insertion_point_not_found(node, "node has no parent sequence"));
    }

    let root = module.root_of(node);
    module.normalize_bodies(root);

    let seq = module
        .parent(node)
        .filter(|&p| module.kind(p).is_block())
        .ok_or_else(|| ScheduleError::insertion_point_not_found(node, "parent is not a statement sequence"))?;
    let pos = match module.kind(seq) {
        NodeKind::Block { stmts } => stmts.iter().position(|&s| s == node),
        _ => None,
    }
    .ok_or_else(|| ScheduleError::insertion_point_not_found(node, "node missing from its parent"))?;

    let call = module.alloc(NodeKind::Call {
        name: SYNC_THREADS.to_string(),
        kind: CallKind::Intrinsic,
        args: Vec::new(),
    });
    let pos = if after { pos + 1 } else { pos };
    module.insert_stmt(seq, pos, call);
    debug!("sync_threads: {} {} {}", SYNC_THREADS, if after { "after" } else { "before" }, node);
    Ok(call)
}

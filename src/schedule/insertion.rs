//! Insertion-point search for synthesized cache blocks.
//!
//! The cache region is relaxed over every loop and realized block between
//! the root and the accessing block, so the synthesized fragment has to sit
//! above all of them. The search walks the ancestor chain of the block and
//! picks the innermost statement sequence lying above the outermost such
//! node.

use crate::analysis::access::{accesses_of_named, stores_of_named, AccessKind};
use crate::ir::module::Module;
use crate::ir::node::{NodeId, NodeKind};
use crate::utils::errors::{ScheduleError, ScheduleResult};
use log::trace;
use std::fmt;

/// A position inside a statement sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPoint {
    /// The `Block` receiving the fragment
    pub seq: NodeId,
    /// Index the fragment will occupy
    pub pos: usize,
}

impl fmt::Display for InsertionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.seq, self.pos)
    }
}

/// Find where the fragment caching `tensor` for `block` goes.
///
/// A read cache is placed before the anchor and must not see any other
/// producer of `tensor` inside the anchor; a write drain is placed after the
/// anchor and must not see any other access of `tensor` inside it.
pub fn find_insertion_point(
    module: &Module,
    block: NodeId,
    root: NodeId,
    tensor: &str,
    direction: AccessKind,
) -> ScheduleResult<InsertionPoint> {
    let mut chain = vec![block];
    chain.extend(module.ancestors(block));
    if chain.last() != Some(&root) || !module.exprs().contains(&root) {
        return Err(ScheduleError::insertion_point_not_found(
            block,
            "block is not attached to the schedule root",
        ));
    }

    // Outermost loop or non-root realized block on the chain
    let barrier = chain
        .iter()
        .rposition(|&id| match module.kind(id) {
            NodeKind::For(_) => true,
            NodeKind::ScheduleBlockRealize { .. } => id != root,
            _ => false,
        })
        .unwrap_or(0);

    let seq_index = chain
        .iter()
        .enumerate()
        .skip(barrier + 1)
        .find(|(_, id)| module.kind(**id).is_block())
        .map(|(i, _)| i)
        .ok_or_else(|| {
            ScheduleError::insertion_point_not_found(block, "no statement sequence encloses the block")
        })?;
    let seq = chain[seq_index];
    let anchor = chain[seq_index - 1];

    let anchor_pos = match module.kind(seq) {
        NodeKind::Block { stmts } => stmts.iter().position(|&s| s == anchor),
        _ => None,
    }
    .ok_or_else(|| ScheduleError::insertion_point_not_found(seq, "anchor missing from its parent sequence"))?;

    let conflicting = match direction {
        AccessKind::Read => stores_of_named(module, anchor, tensor),
        AccessKind::Write => accesses_of_named(module, anchor, tensor),
    };
    if let Some(&other) = conflicting.iter().find(|&&a| !module.is_within(a, block)) {
        return Err(ScheduleError::insertion_point_not_found(
            other,
            format!("{} is also accessed next to the cached block", tensor),
        ));
    }

    let pos = match direction {
        AccessKind::Read => anchor_pos,
        AccessKind::Write => anchor_pos + 1,
    };
    let point = InsertionPoint { seq, pos };
    trace!("insertion point for {} near {}: {}", tensor, block, point);
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::node::IterVar;
    use crate::ir::tensor::{ElementType, Tensor};
    use crate::utils::errors::ScheduleErrorKind;

    /// root { A = ...; for i { B[vi] = A[vi] } }
    fn producer_consumer(fused: bool) -> (Module, NodeId, NodeId, NodeId) {
        let mut module = Module::new("insert");
        let a = module.declare_tensor(Tensor::new("A", vec![8], ElementType::Float));
        let out = module.declare_tensor(Tensor::new("B", vec![8], ElementType::Float));
        let mut b = IrBuilder::new(&mut module);

        let i0 = b.var("i");
        let v0 = b.var("vi");
        let one = b.float(1.0);
        let produce = b.store(a, vec![v0], one);
        let producer = b.realize("A", vec![IterVar::new("vi", 0, 8)], vec![i0], vec![produce]);

        let i1 = b.var("i");
        let v1 = b.var("vi");
        let v2 = b.var("vi");
        let read = b.load(a, vec![v1]);
        let consume = b.store(out, vec![v2], read);
        let consumer = b.realize("B", vec![IterVar::new("vi", 0, 8)], vec![i1], vec![consume]);

        let (stmts, nest) = if fused {
            let l = b.for_loop("i", 0, 8, vec![producer, consumer]);
            (vec![l], l)
        } else {
            let l0 = b.for_loop("i", 0, 8, vec![producer]);
            let l1 = b.for_loop("i", 0, 8, vec![consumer]);
            (vec![l0, l1], l1)
        };
        let root = b.root(stmts);
        (module, root, consumer, nest)
    }

    #[test]
    fn test_read_goes_before_loop_nest() {
        let (module, root, consumer, nest) = producer_consumer(false);
        let point = find_insertion_point(&module, consumer, root, "A", AccessKind::Read).unwrap();
        assert_eq!(module.parent(nest), Some(point.seq));
        assert_eq!(point.pos, 1);
    }

    #[test]
    fn test_write_goes_after_loop_nest() {
        let (module, root, consumer, _) = producer_consumer(false);
        let point = find_insertion_point(&module, consumer, root, "B", AccessKind::Write).unwrap();
        assert_eq!(point.pos, 2);
    }

    #[test]
    fn test_producer_inside_anchor_rejected() {
        let (module, root, consumer, _) = producer_consumer(true);
        let err = find_insertion_point(&module, consumer, root, "A", AccessKind::Read).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::InsertionPointNotFound);
    }
}

//! Buffer binding and the local-size fixer.

use crate::analysis::access::accesses_of_buffer;
use crate::analysis::affine::AffineExpr;
use crate::analysis::region::{Interval, IterDomain};
use crate::ir::module::Module;
use crate::ir::node::{BinaryOp, NodeId, NodeKind};
use crate::ir::tensor::{Buffer, BufferId, MemoryScope};
use crate::schedule::expect_realize;
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, ScheduleResult};
use log::{debug, trace, warn};
use std::collections::HashMap;

/// Bind the tensor stored by `block` and its whole alias group to a fresh
/// buffer in `memory`. With `fixed` set, thread-private buffers are shrunk
/// to the footprint `block` actually touches.
pub fn set_buffer(module: &mut Module, block: NodeId, memory: MemoryScope, fixed: bool) -> ScheduleResult<BufferId> {
    expect_realize(module, block)?;
    let stores = module.collect(block, |_, k| matches!(k, NodeKind::Store { .. }), false);
    if stores.len() != 1 {
        return Err(ScheduleError::new(
            ScheduleErrorKind::MultiplicityViolation,
            format!("expected exactly one store in the block, found {}", stores.len()),
        )
        .at(block));
    }
    let tensor = module.kind(stores[0]).accessed_tensor().ok_or_else(|| {
        ScheduleError::unsupported_access("store does not reference a tensor").at(stores[0])
    })?;
    let base = module.tensor_name(tensor).to_string();
    let shape = module.tensor(tensor).shape.clone();

    let name = module.fresh_name(&format!("_{}_temp_buffer", base));
    let buffer = module.add_buffer(Buffer::new(name.clone(), memory, shape));
    let members = module.bind_alias_group(&base, buffer);
    debug!("set_buffer: {} ({} tensors) -> {} ({})", base, members, name, memory);

    if memory.is_thread_private() && fixed {
        fix_local_buffer_size(module, block, buffer);
    }
    Ok(buffer)
}

/// Per-access split of one index into the part fixed per block instance and
/// the bounds of the part varying over loops inside the owning block.
struct IndexSplit {
    fixed: AffineExpr,
    inner: AffineExpr,
    inner_range: Interval,
    /// Block the access belongs to
    owner: NodeId,
    /// Loops above `owner`, by variable
    outer_loops: HashMap<String, NodeId>,
}

/// Shrink `buffer` to the box its accesses span within one iteration of the
/// loops enclosing `block`. Accesses outside `block` are shifted along with
/// the block's own when they sit in the same loops; a dimension where they
/// differ keeps its extent. Returns whether any dimension shrank.
pub fn fix_local_buffer_size(module: &mut Module, block: NodeId, buffer: BufferId) -> bool {
    let buffer_name = module.buffer(buffer).name.clone();
    let accesses: Vec<NodeId> = module
        .exprs()
        .iter()
        .flat_map(|&root| accesses_of_buffer(module, root, &buffer_name))
        .collect();
    if !accesses.iter().any(|&a| module.is_within(a, block)) {
        return false;
    }
    let outside = accesses.iter().filter(|&&a| !module.is_within(a, block)).count();

    let mut shape = module.buffer(buffer).shape.clone();
    let mut rewrites: Vec<(NodeId, usize, AffineExpr)> = Vec::new();
    for (d, extent) in shape.iter_mut().enumerate() {
        let splits: Option<Vec<IndexSplit>> = accesses.iter().map(|&a| split_index(module, block, a, d)).collect();
        let offsets = splits.as_deref().and_then(aligned_offsets);
        let (splits, offsets) = match (splits, offsets) {
            (Some(s), Some(o)) => (s, o),
            _ => {
                if outside > 0 {
                    warn!(
                        "{} dim {} is indexed differently outside of block {}, keeping its extent",
                        buffer_name, d, block
                    );
                }
                continue;
            }
        };

        let lo = splits.iter().zip(&offsets).map(|(s, c)| c + s.inner_range.min).min().unwrap_or(0);
        let hi = splits.iter().zip(&offsets).map(|(s, c)| c + s.inner_range.max).max().unwrap_or(0);
        let new_extent = hi - lo + 1;
        if new_extent >= *extent {
            continue;
        }
        trace!("{} dim {}: {} -> {}", buffer_name, d, extent, new_extent);
        *extent = new_extent;
        for ((&access, split), c) in accesses.iter().zip(&splits).zip(&offsets) {
            rewrites.push((access, d, split.inner.clone() + AffineExpr::constant(c - lo)));
        }
    }

    if rewrites.is_empty() {
        return false;
    }
    for (access, d, index) in rewrites {
        let node = build_affine(module, &index);
        module.set_parent(node, Some(access));
        match module.kind_mut(access) {
            NodeKind::Load { indices, .. } | NodeKind::Store { indices, .. } => {
                if let Some(slot) = indices.get_mut(d) {
                    *slot = node;
                }
            }
            _ => {}
        }
    }
    module.buffer_mut(buffer).shape = shape.clone();
    let bound: Vec<_> = module
        .tensors()
        .filter(|(_, t)| t.buffer == Some(buffer))
        .map(|(id, _)| id)
        .collect();
    for tensor in bound {
        module.tensor_mut(tensor).shape = shape.clone();
    }
    debug!("fixed {} to {:?} ({} accesses outside the block)", buffer_name, shape, outside);
    true
}

/// Constant offset of each fixed part from the first one. `None` when two
/// accesses differ by more than a constant or name different loops.
fn aligned_offsets(splits: &[IndexSplit]) -> Option<Vec<i64>> {
    let first = splits.first()?;
    let mut reference = first.fixed.clone();
    reference.constant = 0;
    splits
        .iter()
        .map(|s| {
            let same_loops = s.fixed.vars().all(|v| match (s.outer_loops.get(v), first.outer_loops.get(v)) {
                (Some(a), Some(b)) => a == b,
                (None, None) => s.owner == first.owner,
                _ => false,
            });
            if !same_loops {
                return None;
            }
            (s.fixed.clone() - reference.clone()).as_constant()
        })
        .collect()
}

/// Nearest realized block with iteration values enclosing `access`.
fn owning_block(module: &Module, access: NodeId) -> NodeId {
    module
        .ancestors(access)
        .into_iter()
        .find(|&a| matches!(module.kind(a), NodeKind::ScheduleBlockRealize { iter_values, .. } if !iter_values.is_empty()))
        .unwrap_or_else(|| module.root_of(access))
}

/// Split index `d` of `access`, with block iteration variables replaced by
/// the loops they are bound to, into the part varying over loops inside
/// the owning block and the rest.
fn split_index(module: &Module, block: NodeId, access: NodeId, d: usize) -> Option<IndexSplit> {
    let index = *module.kind(access).access_indices()?.get(d)?;
    let owner = if module.is_within(access, block) {
        block
    } else {
        owning_block(module, access)
    };

    let mut inner_vars = Vec::new();
    let mut outer_loops = HashMap::new();
    let mut above = false;
    for a in module.ancestors(access) {
        if a == owner {
            above = true;
        }
        if let NodeKind::For(l) = module.kind(a) {
            if above {
                outer_loops.entry(l.var.clone()).or_insert(a);
            } else {
                inner_vars.push(l.var.clone());
            }
        }
    }

    let domain = IterDomain::enclosing(module, access, module.root_of(access));
    let aff = domain.affine_of(module, index)?;
    let (inner, fixed) = aff.split(&inner_vars);
    let inner_range = domain.bound_affine(&inner)?;
    Some(IndexSplit { fixed, inner, inner_range, owner, outer_loops })
}

/// Materialize an affine expression as IR.
fn build_affine(module: &mut Module, aff: &AffineExpr) -> NodeId {
    let mut acc: Option<NodeId> = None;
    for (var, &coeff) in &aff.terms {
        let v = module.alloc(NodeKind::Var(var.clone()));
        let term = if coeff == 1 {
            v
        } else {
            let c = module.alloc(NodeKind::IntImm(coeff));
            module.alloc(NodeKind::Binary { op: BinaryOp::Mul, lhs: c, rhs: v })
        };
        acc = Some(match acc {
            Some(lhs) => module.alloc(NodeKind::Binary { op: BinaryOp::Add, lhs, rhs: term }),
            None => term,
        });
    }
    match acc {
        None => module.alloc(NodeKind::IntImm(aff.constant)),
        Some(expr) if aff.constant == 0 => expr,
        Some(expr) => {
            let c = module.alloc(NodeKind::IntImm(aff.constant));
            module.alloc(NodeKind::Binary { op: BinaryOp::Add, lhs: expr, rhs: c })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::node::IterVar;
    use crate::ir::tensor::{ElementType, Tensor};

    /// for i, j: C[vi, vj] = 1.0
    fn elementwise() -> (Module, NodeId) {
        let mut module = Module::new("fix");
        let c = module.declare_tensor(Tensor::new("C", vec![8, 8], ElementType::Float));
        let mut b = IrBuilder::new(&mut module);
        let i = b.var("i");
        let j = b.var("j");
        let vi = b.var("vi");
        let vj = b.var("vj");
        let one = b.float(1.0);
        let store = b.store(c, vec![vi, vj], one);
        let block = b.realize(
            "C",
            vec![IterVar::new("vi", 0, 8), IterVar::new("vj", 0, 8)],
            vec![i, j],
            vec![store],
        );
        let lj = b.for_loop("j", 0, 8, vec![block]);
        let li = b.for_loop("i", 0, 8, vec![lj]);
        b.root(vec![li]);
        (module, block)
    }

    #[test]
    fn test_fixed_local_shrinks_to_point() {
        let (mut module, block) = elementwise();
        let buffer = set_buffer(&mut module, block, MemoryScope::Local, true).unwrap();
        assert_eq!(module.buffer(buffer).shape, vec![1, 1]);
        let c = module.tensors_named("C")[0];
        assert_eq!(module.tensor(c).shape, vec![1, 1]);
        let store = module.collect(block, |_, k| matches!(k, NodeKind::Store { .. }), true)[0];
        assert_eq!(module.expr_to_string(store), "C[0, 0] = 1.0");
    }

    #[test]
    fn test_unfixed_keeps_extents() {
        let (mut module, block) = elementwise();
        let buffer = set_buffer(&mut module, block, MemoryScope::Register, false).unwrap();
        assert_eq!(module.buffer(buffer).shape, vec![8, 8]);
        assert_eq!(module.buffer(buffer).name, "_C_temp_buffer");
    }

    fn realize_ij(b: &mut IrBuilder<'_>, name: &str, body: NodeId) -> NodeId {
        let values = vec![b.var("i"), b.var("j")];
        b.realize(name, vec![IterVar::new("vi", 0, 16), IterVar::new("vj", 0, 16)], values, vec![body])
    }

    /// `C[vi, vj] = A[vi, vj]` then `D[vi, vj] = C[vi, vj] * 2`, either
    /// inside one `i, j` nest or in two separate nests.
    fn producer_consumer(fused: bool) -> (Module, NodeId, NodeId) {
        let mut module = Module::new("pc");
        let a = module.declare_tensor(Tensor::new("A", vec![16, 16], ElementType::Float));
        let c = module.declare_tensor(Tensor::new("C", vec![16, 16], ElementType::Float));
        let d = module.declare_tensor(Tensor::new("D", vec![16, 16], ElementType::Float));
        let mut b = IrBuilder::new(&mut module);

        let a_idx = vec![b.var("vi"), b.var("vj")];
        let read_a = b.load(a, a_idx);
        let c_idx = vec![b.var("vi"), b.var("vj")];
        let produce = b.store(c, c_idx, read_a);
        let producer = realize_ij(&mut b, "C", produce);

        let c_idx = vec![b.var("vi"), b.var("vj")];
        let read_c = b.load(c, c_idx);
        let two = b.float(2.0);
        let value = b.mul(read_c, two);
        let d_idx = vec![b.var("vi"), b.var("vj")];
        let consume = b.store(d, d_idx, value);
        let consumer = realize_ij(&mut b, "D", consume);

        let stmts = if fused {
            let lj = b.for_loop("j", 0, 16, vec![producer, consumer]);
            vec![b.for_loop("i", 0, 16, vec![lj])]
        } else {
            let lj0 = b.for_loop("j", 0, 16, vec![producer]);
            let li0 = b.for_loop("i", 0, 16, vec![lj0]);
            let lj1 = b.for_loop("j", 0, 16, vec![consumer]);
            let li1 = b.for_loop("i", 0, 16, vec![lj1]);
            vec![li0, li1]
        };
        b.root(stmts);
        (module, producer, read_c)
    }

    #[test]
    fn test_consumer_in_same_nest_is_shifted() {
        let (mut module, producer, read_c) = producer_consumer(true);
        let buffer = set_buffer(&mut module, producer, MemoryScope::Local, true).unwrap();
        assert_eq!(module.buffer(buffer).shape, vec![1, 1]);
        assert_eq!(module.expr_to_string(read_c), "C[0, 0]");
    }

    #[test]
    fn test_consumer_in_other_nest_keeps_extents() {
        let (mut module, producer, read_c) = producer_consumer(false);
        let buffer = set_buffer(&mut module, producer, MemoryScope::Local, true).unwrap();
        assert_eq!(module.buffer(buffer).shape, vec![16, 16]);
        assert_eq!(module.expr_to_string(read_c), "C[vi, vj]");
    }

    #[test]
    fn test_inner_loop_footprint() {
        // C[vi, k] written for k in [0, 4) inside the block
        let mut module = Module::new("inner");
        let c = module.declare_tensor(Tensor::new("C", vec![8, 16], ElementType::Float));
        let mut b = IrBuilder::new(&mut module);
        let i = b.var("i");
        let vi = b.var("vi");
        let k = b.var("k");
        let zero = b.float(0.0);
        let store = b.store(c, vec![vi, k], zero);
        let inner = b.for_loop("k", 0, 4, vec![store]);
        let block = b.realize("C", vec![IterVar::new("vi", 0, 8)], vec![i], vec![inner]);
        let li = b.for_loop("i", 0, 8, vec![block]);
        b.root(vec![li]);

        let buffer = set_buffer(&mut module, block, MemoryScope::Local, true).unwrap();
        assert_eq!(module.buffer(buffer).shape, vec![1, 4]);
        assert_eq!(module.expr_to_string(store), "C[0, k] = 0.0");
    }
}
